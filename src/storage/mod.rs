//! Guide persistence
//!
//! SQLite in production, an in-memory mock for tests, both behind
//! [`GuideRepository`].

pub mod repository;

pub use repository::{
    create_mock_repository, create_sqlite_repository, GuideRepository, MockGuideRepository,
    SharedGuideRepository, SqliteGuideRepository, StatusCounts,
};
