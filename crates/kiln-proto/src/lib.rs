/// Generated gRPC protocol definitions for the kilnd build engine.
///
/// This crate provides the protocol buffer definitions and generated code
/// for the engine control API consumed by kiln clients and served by
/// kilnd itself.
pub mod kiln {
    pub mod v1 {
        tonic::include_proto!("kiln.v1");
    }
}

// Re-export commonly used types for convenience
pub use kiln::v1::*;
