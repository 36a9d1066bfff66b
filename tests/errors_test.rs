#[cfg(test)]
mod error_tests {
    use framereel::errors::ReelError;
    use std::error::Error;

    #[test]
    fn test_reel_error_encoding() {
        let error = ReelError::EncodingError("Test encode error".to_string());
        assert!(error.to_string().contains("Encoding error"));
        assert!(error.to_string().contains("Test encode error"));
    }

    #[test]
    fn test_reel_error_invalid_schedule() {
        let error = ReelError::InvalidSchedule("loop point is zero".to_string());
        assert_eq!(error.to_string(), "Invalid music schedule: loop point is zero");
    }

    #[test]
    fn test_reel_error_debug_format() {
        let error = ReelError::MuxingError("Debug test".to_string());
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("MuxingError"));
        assert!(debug_str.contains("Debug test"));
    }

    #[test]
    fn test_reel_error_display_trait() {
        let error = ReelError::InvalidState("Display test".to_string());
        let display_str = format!("{}", error);
        assert_eq!(display_str, "Invalid recorder state: Display test");
    }

    #[test]
    fn test_reel_error_implements_error_trait() {
        let error = ReelError::AudioError("Error trait test".to_string());
        let _error_trait: &dyn Error = &error;
        assert!(error.source().is_none());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing song");
        let error: ReelError = io.into();
        assert!(matches!(error, ReelError::IoError(ref msg) if msg.contains("missing song")));
    }

    #[test]
    fn test_question_mark_propagates_io_errors() {
        fn read_missing() -> Result<String, ReelError> {
            Ok(std::fs::read_to_string("/definitely/not/here.toml")?)
        }
        assert!(matches!(read_missing(), Err(ReelError::IoError(_))));
    }

    #[test]
    fn test_all_error_variants() {
        let errors = vec![
            ReelError::EncodingError("Encoding".to_string()),
            ReelError::MuxingError("Muxing".to_string()),
            ReelError::IoError("IO".to_string()),
            ReelError::AudioError("Audio".to_string()),
            ReelError::ConfigError("Config".to_string()),
            ReelError::InvalidSchedule("Schedule".to_string()),
            ReelError::InvalidState("State".to_string()),
        ];

        let prefixes = [
            "Encoding error:",
            "Muxing error:",
            "IO error:",
            "Audio error:",
            "Configuration error:",
            "Invalid music schedule:",
            "Invalid recorder state:",
        ];

        for (error, prefix) in errors.iter().zip(prefixes) {
            assert!(
                error.to_string().starts_with(prefix),
                "{} should start with {}",
                error,
                prefix
            );
        }
    }

    #[test]
    fn test_errors_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReelError>();
    }
}
