pub mod realtime;
pub mod supabase;

pub use supabase::{SupabaseClient, SupabaseSession};
