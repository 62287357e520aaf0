//! The versioned, content-addressed on-disk store.
//!
//! See [`crate::store::VersionedStore`] for the two-region layout this module
//! manages: the canonical `.versions/<name>@<version>` copies and the mirrored
//! `<name>` active view.

mod versioned_store;

pub use versioned_store::VersionedStore;
