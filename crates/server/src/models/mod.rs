//! Domain models.
//!
//! These types represent validated domain objects separate from database row
//! types. They serialize directly into API responses.

pub mod message;
pub mod order;
pub mod product;
pub mod session;
pub mod user;

pub use message::{Message, NewMessage, ThreadSummary};
pub use order::{NewOrder, Order, OrderStats};
pub use product::{Category, Product};
pub use session::{CurrentSession, keys as session_keys};
pub use user::{NewUser, User, UserProfile};
