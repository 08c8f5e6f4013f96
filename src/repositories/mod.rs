pub(crate) mod exams;
pub(crate) mod locks;
pub(crate) mod memory;
pub(crate) mod redis_exams;

pub(crate) use exams::{ExamStore, StoreError, StoreHealth};
pub(crate) use memory::MemoryExamStore;
pub(crate) use redis_exams::RedisExamStore;
