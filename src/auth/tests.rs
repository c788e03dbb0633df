use super::*;
use axum::http::HeaderMap;

fn headers_with(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", value.parse().unwrap());
    headers
}

#[cfg(test)]
mod extract_bearer_token_tests {
    use super::*;

    #[test]
    fn valid_bearer_token() {
        let headers = headers_with("Bearer client-token-1");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "client-token-1");
    }

    #[test]
    fn valid_bearer_token_with_extra_whitespace() {
        let headers = headers_with("Bearer   client-token-1  ");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "client-token-1");
    }

    #[test]
    fn case_insensitive_bearer() {
        let headers = headers_with("bearer client-token-1");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "client-token-1");
    }

    #[test]
    fn missing_authorization_header() {
        let headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::Missing));
    }

    #[test]
    fn wrong_auth_scheme() {
        let headers = headers_with("Basic dXNlcjpwYXNz");
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::InvalidFormat));
    }

    #[test]
    fn bearer_without_token() {
        let headers = headers_with("Bearer");
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::InvalidFormat));
    }

    #[test]
    fn bearer_with_empty_token() {
        let headers = headers_with("Bearer  ");
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::Empty));
    }
}

#[cfg(test)]
mod authorize_tests {
    use super::*;

    #[test]
    fn open_when_no_token_configured() {
        assert_eq!(authorize(&HeaderMap::new(), None), Ok(()));
    }

    #[test]
    fn matching_token() {
        let headers = headers_with("Bearer s3cret");
        assert_eq!(authorize(&headers, Some("s3cret")), Ok(()));
    }

    #[test]
    fn wrong_token() {
        let headers = headers_with("Bearer s3cret");
        assert_eq!(authorize(&headers, Some("other")), Err(TokenError::Mismatch));
        assert_eq!(authorize(&headers, Some("s3cre")), Err(TokenError::Mismatch));
    }

    #[test]
    fn missing_token_when_required() {
        assert_eq!(
            authorize(&HeaderMap::new(), Some("s3cret")),
            Err(TokenError::Missing)
        );
    }
}

#[cfg(test)]
mod token_error_display_tests {
    use super::*;

    #[test]
    fn error_messages() {
        assert_eq!(
            TokenError::Missing.to_string(),
            "Authorization token not provided"
        );
        assert_eq!(
            TokenError::InvalidFormat.to_string(),
            "Invalid authorization token format"
        );
        assert_eq!(TokenError::Empty.to_string(), "Authorization token is empty");
        assert_eq!(TokenError::Mismatch.to_string(), "Unauthorized");
    }
}
