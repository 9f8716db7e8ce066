/* 📖 # Why use a separate file for these error tests?

These tests pin the Debug tree layout and the span trace section.
Keeping them apart from error.rs keeps the span line numbers stable while the error module changes.
*/

#[cfg(test)]
mod tests {
    use crate::{PathwayError, PathwayResult, ResultExt};
    use expect_test::expect;
    use std::io;
    use tracing::span;
    use tracing_error::ErrorLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    /// Set up tracing with ErrorLayer for tests.
    /// Uses `try_init()` to handle multiple tests running concurrently.
    fn setup_tracing_subscriber() {
        let _ = tracing_subscriber::registry()
            .with(ErrorLayer::default())
            .try_init();
    }

    #[test]
    fn test_debug_without_span_has_no_trace_section() {
        setup_tracing_subscriber();

        let error = PathwayError::message("something went wrong")
            .context("during file processing")
            .context("in batch job");

        expect![[r#"
            something went wrong
            ├─ during file processing
            └─ in batch job

        "#]]
        .assert_debug_eq(&error);
    }

    #[test]
    fn test_debug_nested_errors() {
        let inner = PathwayError::file(
            "/srv/site/app.toml",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        )
        .context("reading include");

        let outer = PathwayError::message("config reload failed")
            .context("while checking dependencies")
            .caused_by(inner);

        expect![[r#"
            config reload failed
            ├─ while checking dependencies
            └─ cause: File error at /srv/site/app.toml: no such file
               └─ reading include

        "#]]
        .assert_debug_eq(&outer);
    }

    #[test]
    fn test_debug_multiple_nested_errors() {
        let error_1 = PathwayError::message("error 1").context("context 1");
        let error_2 = PathwayError::message("error 2")
            .context("context 2")
            .caused_by(error_1);
        let error_3 = PathwayError::resolution("http:/nohost", "bad scheme")
            .context("context 3")
            .caused_by(error_2);

        expect![[r#"
            Cannot resolve 'http:/nohost': bad scheme
            ├─ context 3
            └─ cause: error 2
               ├─ context 2
               └─ cause: error 1
                  └─ context 1

        "#]]
        .assert_debug_eq(&error_3);
    }

    #[test]
    fn test_spantrace_names_the_enclosing_span() {
        setup_tracing_subscriber();

        let operation_span = span!(tracing::Level::DEBUG, "open_stream", path = "file:/tmp/x");
        let _guard = operation_span.enter();

        let result: PathwayResult<()> = Err(Box::new(PathwayError::message("open failed")));
        let error = result.context("opening file:/tmp/x").unwrap_err();

        let debug = format!("{:?}", error);
        assert!(debug.starts_with("open failed\n└─ opening file:/tmp/x\nTrace: "));
        assert!(debug.contains("open_stream"));
        assert!(debug.contains("with path=\"file:/tmp/x\""));
    }
}
