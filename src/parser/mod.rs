pub mod likes;
pub mod links;

pub use likes::{extract_likes, widget_url};
pub use links::{first_facebook_link, page_url};
