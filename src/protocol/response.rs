//! Fixed status responses.

/// The two replies a client can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Bet was stored.
    Ok,
    /// Store rejected the bet.
    StoreFailed,
}

impl Response {
    /// Wire encoding of the response.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Response::Ok => b"OK\n",
            Response::StoreFailed => b"ERROR SAVING BET\n",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_encoding() {
        assert_eq!(Response::Ok.as_bytes(), b"OK\n");
        assert_eq!(Response::StoreFailed.as_bytes(), b"ERROR SAVING BET\n");
    }
}
