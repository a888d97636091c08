//! The handful of runtime API paths the proxy cares about.

pub const API_VERSION: &str = "2018-06-01";
pub const NEXT_INVOCATION_PATH: &str = "/2018-06-01/runtime/invocation/next";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Response,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimePath<'a> {
    /// `GET /2018-06-01/runtime/invocation/next`
    NextInvocation,
    /// `POST /2018-06-01/runtime/invocation/<id>/(response|error)`
    Completion {
        request_id: &'a str,
        outcome: Outcome,
    },
    Other,
}

pub fn classify(path: &str) -> RuntimePath<'_> {
    if path == NEXT_INVOCATION_PATH {
        return RuntimePath::NextInvocation;
    }

    let Some(rest) = path
        .strip_prefix('/')
        .and_then(|p| p.strip_prefix(API_VERSION))
        .and_then(|p| p.strip_prefix("/runtime/invocation/"))
    else {
        return RuntimePath::Other;
    };

    let mut segments = rest.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(id), Some(tail), None) if !id.is_empty() => {
            let outcome = match tail {
                "response" => Outcome::Response,
                "error" => Outcome::Error,
                _ => return RuntimePath::Other,
            };
            RuntimePath::Completion {
                request_id: id,
                outcome,
            }
        }
        _ => RuntimePath::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_invocation_is_exact() {
        assert_eq!(classify("/2018-06-01/runtime/invocation/next"), RuntimePath::NextInvocation);
        assert_eq!(classify("/2018-06-01/runtime/invocation/next/"), RuntimePath::Other);
        assert_eq!(classify("/2020-01-01/runtime/invocation/next"), RuntimePath::Other);
    }

    #[test]
    fn test_completion_paths() {
        assert_eq!(
            classify("/2018-06-01/runtime/invocation/abc123/response"),
            RuntimePath::Completion {
                request_id: "abc123",
                outcome: Outcome::Response
            }
        );
        assert_eq!(
            classify("/2018-06-01/runtime/invocation/8476a536-e9f4-11e8-9739-2dfe598c3fcd/error"),
            RuntimePath::Completion {
                request_id: "8476a536-e9f4-11e8-9739-2dfe598c3fcd",
                outcome: Outcome::Error
            }
        );
    }

    #[test]
    fn test_non_completion_paths() {
        for path in [
            "/2018-06-01/runtime/init/error",
            "/2018-06-01/runtime/invocation//response",
            "/2018-06-01/runtime/invocation/abc/response/extra",
            "/2018-06-01/runtime/invocation/abc/result",
            "/2018-06-01/runtime/invocation/abc",
            "/2020-01-01/extension/event/next",
            "/",
            "",
        ] {
            assert_eq!(classify(path), RuntimePath::Other, "{path}");
        }
    }

    #[test]
    fn test_literal_next_segment_is_treated_as_request_id() {
        assert!(matches!(
            classify("/2018-06-01/runtime/invocation/next/response"),
            RuntimePath::Completion { request_id: "next", .. }
        ));
    }
}
