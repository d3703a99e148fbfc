//! # BookChat Testkit
//!
//! Testing utilities for BookChat.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Exact signed-message bytes and keys for fixed inputs
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Participants and kernels for setting up test scenarios
//!
//! ## Golden Vectors
//!
//! ```rust
//! use bookchat_testkit::vectors::{all_vectors, generate_record_from_vector};
//!
//! for vector in all_vectors() {
//!     let record = generate_record_from_vector(&vector);
//!     println!("{}: {}", vector.name, record.digest());
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use bookchat_testkit::generators::{record_from_params, RecordParams};
//!
//! proptest! {
//!     #[test]
//!     fn digest_is_deterministic(params: RecordParams) {
//!         let r1 = record_from_params(&params);
//!         let r2 = record_from_params(&params);
//!         prop_assert_eq!(r1.digest(), r2.digest());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use bookchat_testkit::fixtures::{at, TestFixture};
//!
//! let alice = TestFixture::new("alice");
//! let draft = alice.message(at(0), "hello");
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{at, multi_party_fixtures, KernelFixture, TestFixture, BASE_MICROS};
pub use generators::{draft_from_params, record_from_params, RecordParams};
pub use vectors::{all_vectors, generate_record_from_vector, verify_all_vectors, GoldenVector};
