pub mod fixture;

pub use fixture::FixtureBackend;
