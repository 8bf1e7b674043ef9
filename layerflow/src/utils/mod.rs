//! Small shared helpers.

mod uuid_utils;

pub use uuid_utils::{generate_uuid, generate_uuid_v7};

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid_is_valid() {
        let id = generate_uuid();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_generate_uuid_v7_version() {
        let id = generate_uuid_v7();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_panic_message_from_str_and_string() {
        let p1: Box<dyn std::any::Any + Send> = Box::new("boom");
        let p2: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        let p3: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(p1.as_ref()), "boom");
        assert_eq!(panic_message(p2.as_ref()), "bang");
        assert_eq!(panic_message(p3.as_ref()), "non-string panic payload");
    }
}
