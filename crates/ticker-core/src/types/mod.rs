//! 서비스 전반에서 사용되는 공통 타입.

mod symbol;

pub use symbol::*;
