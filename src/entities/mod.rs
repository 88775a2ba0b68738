pub mod order;
pub mod order_item;
pub mod outbox_message;

pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use outbox_message::Entity as OutboxMessage;
