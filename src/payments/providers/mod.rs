pub mod disabled;
pub mod razorpay;

pub use disabled::DisabledGateway;
pub use razorpay::{RazorpayConfig, RazorpayGateway};
