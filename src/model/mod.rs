pub mod backup;
pub mod common;
pub mod expand;
pub mod item;
pub mod tenant;
pub mod user;

pub use backup::*;
pub use common::*;
pub use expand::*;
pub use item::*;
pub use tenant::*;
pub use user::*;
