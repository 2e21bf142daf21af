//! CONTEXT: Host builds of the syscall wrappers
//! OWNERS: @runtime
//! TEST_SCOPE:
//!   - Wrappers never trap on the host and report `Unsupported`
use axon_abi::{fork, read, write, yield_, AbiError, STDIN, STDOUT};

#[test]
fn wrappers_are_unsupported_on_host() {
    let mut buf = [0u8; 4];
    assert_eq!(write(STDOUT, b"hi"), Err(AbiError::Unsupported));
    assert_eq!(read(STDIN, &mut buf), Err(AbiError::Unsupported));
    assert_eq!(yield_(), Err(AbiError::Unsupported));
    assert_eq!(fork(), Err(AbiError::Unsupported));
}
