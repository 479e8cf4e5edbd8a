//! Data models
//!
//! Entities persisted by the repositories, their workflow states, and the
//! input/filter types accepted by the services.

mod blog_post;
mod business;
mod event;
mod pagination;
mod user;

pub use blog_post::{
    BlogPost, BlogPostFilter, BlogPostStatus, CreateBlogPostInput, UpdateBlogPostInput,
};
pub use business::{
    Business, BusinessCategory, BusinessFilter, CreateBusinessInput, UpdateBusinessInput,
};
pub use event::{
    Attendee, CancelEventInput, CreateEventInput, Event, EventFilter, EventRegistration,
    EventStatus, EventWithAttendance, UpdateEventInput,
};
pub use pagination::{ListParams, PagedResult};
pub use user::{
    normalize_email, ChangePasswordInput, LoginInput, RegisterInput, UpdateProfileInput, User,
    UserFilter, UserRole, UserStatus,
};
