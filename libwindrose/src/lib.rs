pub mod arena;
pub mod attribute;
pub mod error;
pub mod filter;
pub mod index;
pub mod order_table;
pub mod space;
pub mod visited;

pub use attribute::AttKey;
pub use attribute::Attribute;
pub use attribute::FixedBytes;
pub use attribute::KeyRange;
pub use error::Error;
pub use error::Result;
pub use filter::AttSet;
pub use filter::Filter;
pub use filter::LabelBitset;
pub use index::Windrose;
pub use space::Space;
pub use space::SpaceKind;

/// Dense internal id, assigned at insert time and never reused.
pub type InternalId = u32;
/// Opaque external identifier carried by every item.
pub type Label = u64;
