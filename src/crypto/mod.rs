//! Size arithmetic for client-side encrypted objects.
//!
//! Repositories store some objects in an authenticated block format. Their
//! byte count on the wire differs from what a reader should see, so file
//! attributes are corrected with [`sizing::decrypted_size`].

pub mod sizing;

pub use sizing::decrypted_size;
