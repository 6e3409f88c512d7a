//! Reservation, order, payment and check-in core.
//!
//! Every operation takes the storage handle explicitly and returns
//! `Result<_, AppError>`; nothing here panics on storage failure.

pub mod availability;
pub mod checkin;
pub mod orders;
pub mod payments;
pub mod qr;
pub mod reservation;
pub mod revalidate;
pub mod ticket_status;
