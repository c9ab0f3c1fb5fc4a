//! 외부 저장소 연결.

pub mod redis;
