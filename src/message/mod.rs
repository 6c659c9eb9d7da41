// Tagged-field payment message parsing
pub mod mt202;

pub use mt202::{parse_mt202, PaymentInstruction};
