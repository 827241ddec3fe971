pub mod security;
pub mod sitemap;
