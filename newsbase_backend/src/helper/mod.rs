pub mod feed_helpers;
pub mod form_helpers;
pub mod public_helpers;
pub mod sanitization_helpers;
pub mod staff_helpers;
