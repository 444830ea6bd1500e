pub mod ebay;
pub mod source;
pub mod types;

pub use ebay::EbayClient;
pub use source::ListingSource;
pub use types::*;
