use failure::Fail;

/// Formats a `Fail` and all of its causes into a single multi-line message.
///
/// Each cause is indented one level deeper than its parent so the chain
/// reads top (the error that was reported) to bottom (the root cause).
pub fn format_fail<F: Fail>(fail: &F) -> String {
    let mut message = format!("Error: {}", fail);
    let mut indent = 1;
    let mut cause = fail.cause();
    while let Some(current) = cause {
        message.push_str(&format!("\n{}Caused by: {}", "  ".repeat(indent), current));
        cause = current.cause();
        indent += 1;
    }
    message
}

#[cfg(test)]
mod tests {
    use failure::Fail;

    use super::format_fail;

    #[derive(Debug, Fail)]
    #[fail(display = "root cause")]
    struct RootError;

    #[derive(Debug, Fail)]
    #[fail(display = "outer failure")]
    struct OuterError {
        #[cause]
        cause: RootError,
    }

    #[test]
    fn formats_single_error() {
        let message = format_fail(&RootError);
        assert_eq!(message, "Error: root cause");
    }

    #[test]
    fn formats_error_chain() {
        let error = OuterError { cause: RootError };
        let message = format_fail(&error);
        assert_eq!(message, "Error: outer failure\n  Caused by: root cause");
    }
}
