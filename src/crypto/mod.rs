pub mod ece;
pub mod keys;
pub mod vapid;
