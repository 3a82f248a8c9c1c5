use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Runs `operation`, turning a panic into its rendered message.
///
/// Only unwinding panics can be intercepted; a binary built with
/// `panic = "abort"` terminates before this returns.
pub(crate) fn capture_panic<T>(operation: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(operation)).map_err(|payload| panic_message(payload.as_ref()))
}

/// Renders a panic payload. `panic!` with a literal carries `&str`, a
/// formatted panic carries `String`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passes_value_through() {
        assert_eq!(capture_panic(|| 42), Ok(42));
    }

    #[test]
    fn test_static_message() {
        let err = capture_panic(|| -> u32 { panic!("boom") }).unwrap_err();
        assert_eq!(err, "boom");
    }

    #[test]
    fn test_formatted_message() {
        let id = 296;
        let err = capture_panic(|| -> u32 { panic!("row {id} vanished") }).unwrap_err();
        assert_eq!(err, "row 296 vanished");
    }

    #[test]
    fn test_divide_by_zero() {
        let divisor = std::hint::black_box(0);
        let err = capture_panic(|| 100 / divisor).unwrap_err();
        assert!(err.contains("divide by zero"), "unexpected message: {err}");
    }

    #[test]
    fn test_opaque_payload() {
        let err = capture_panic(|| -> u32 { std::panic::panic_any(17_u32) }).unwrap_err();
        assert_eq!(err, "unknown panic payload");
    }
}
