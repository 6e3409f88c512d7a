pub mod hall;
pub mod order;
pub mod payment;
pub mod product;
pub mod screening;
pub mod ticket;

pub use hall::{Hall, Seat};
pub use order::{NewOrder, NewOrderItem, Order, OrderDetails, OrderItem, OrderItemDetails, ProductLine};
pub use payment::{NewPayment, Payment};
pub use product::Product;
pub use screening::{Movie, Screening};
pub use ticket::{SeatRequest, Ticket, TicketDetails, TicketStatus};
