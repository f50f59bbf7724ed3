//! File metadata: the tag model, the persistent cache in front of the
//! decoders' tag readers, and per-directory ratings.

mod cache;
mod locks;
mod model;
mod ratings;
mod store;

pub use cache::TagCache;
pub use model::{FileTags, TagEdit};
pub use ratings::{RATINGS_FILE, read_rating, write_rating};
pub use store::{CACHE_VERSION, CacheRecord, StoreError, TagStore};
