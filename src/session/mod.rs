pub mod cleanup;
pub mod machine;
pub mod report;
pub mod request;
