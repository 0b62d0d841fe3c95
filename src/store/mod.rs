// Application data store - typed records and the sqlx-backed document store

pub mod database;
pub mod models;

pub use database::DataStore;
pub use models::{
    AdministratorShare, BillingCadence, Comment, Course, CourseModule, Group,
    GroupSettingsUpdate, Lesson, Membership, Post, User, Visibility,
};
