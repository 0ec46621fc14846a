pub mod cascade;
pub mod expand;
pub mod filter;
pub mod flatten;
pub mod items;
pub mod order_key;
pub mod tenants;
pub mod users;

pub use cascade::DescendantWalk;
pub use expand::{parse_expand, Expander};
pub use filter::{FilterConstraint, PayloadFilter};
pub use flatten::{flatten_item, flatten_row, EXPANDED_KEY};
pub use items::{Created, DEFAULT_PAGE_SIZE, MAX_BATCH_SIZE, MAX_PAGE_SIZE};
pub use order_key::{decode_order_key, encode_order_key, ORDER_KEY_WIDTH};
