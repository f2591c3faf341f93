pub mod balance_requests;
pub mod money;
pub mod otp;
pub mod referrals;
pub mod sessions;
pub mod transactions;
pub mod users;
