pub mod controller;
pub mod domain;
pub mod listener;
pub mod ports;
pub mod store;

pub use controller::{BookmarkSyncController, SyncError, SyncResult};
pub use domain::{
    Bookmark, ChangeEvent, ChangeKind, Identity, NewBookmark, OAuthProvider, SignInRedirect,
    BOOKMARKS_TABLE,
};
pub use listener::LiveChangeListener;
pub use ports::{
    BookmarkRepository, ChangeFeed, ChangeStream, IdentityProvider, PortError, PortResult,
    Subscription,
};
pub use store::{BookmarkStore, SyncSnapshot};
