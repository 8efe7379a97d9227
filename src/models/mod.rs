pub mod notification;
pub mod retry;
pub mod status;
pub mod subscription;
pub mod validation;
