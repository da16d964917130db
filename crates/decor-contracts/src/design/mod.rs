mod furniture;
mod image;
mod request;
mod shopping;

pub use furniture::{
    parse_furniture_report, parse_furniture_response, strip_code_fence, FurnitureItem,
    FurnitureReport,
};
pub use self::image::RoomImage;
pub use request::{compose_design_instruction, DesignRequest, GeneratedRoomImage, StylePreset};
pub use shopping::{shopping_links, shopping_url, to_shopping_link, ShoppingLink, SHOPPING_SEARCH_URL};
