pub mod payload;
pub mod printable;
pub mod test_case;

pub use payload::{Payload, PayloadStep, StepKind, SETUP};
pub use printable::PrintableCase;
pub use test_case::{sha256_hex, TestCase, CASE_HASH_LEN};
