pub mod favourites;
pub mod groups;
pub mod index;
pub mod servers;
