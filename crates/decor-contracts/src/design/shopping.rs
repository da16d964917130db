use serde::Serialize;
use url::form_urlencoded;

use crate::design::furniture::FurnitureItem;

pub const SHOPPING_SEARCH_URL: &str = "https://www.google.com/search?tbm=shop&q=";

/// Shopping search URL for an item. Pure: equal items give equal links.
pub fn to_shopping_link(item: &FurnitureItem) -> String {
    shopping_url(&item.search_query)
}

/// Form-encodes `query` (spaces become `+`) onto the shopping search template.
pub fn shopping_url(query: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(query.as_bytes()).collect();
    format!("{SHOPPING_SEARCH_URL}{encoded}")
}

/// Presentation view of an item with its derived link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingLink {
    pub name: String,
    pub color: String,
    pub search_query: String,
    pub url: String,
}

impl From<&FurnitureItem> for ShoppingLink {
    fn from(item: &FurnitureItem) -> Self {
        Self {
            name: item.name.clone(),
            color: item.color.clone(),
            search_query: item.search_query.clone(),
            url: to_shopping_link(item),
        }
    }
}

pub fn shopping_links(items: &[FurnitureItem]) -> Vec<ShoppingLink> {
    items.iter().map(ShoppingLink::from).collect()
}

#[cfg(test)]
mod tests {
    use super::{shopping_links, shopping_url, to_shopping_link, SHOPPING_SEARCH_URL};
    use crate::design::furniture::FurnitureItem;

    #[test]
    fn spaces_become_plus_signs() {
        let item = FurnitureItem::new("Armchair", "Blue", "blue velvet armchair");
        let url = to_shopping_link(&item);
        assert_eq!(
            url,
            "https://www.google.com/search?tbm=shop&q=blue+velvet+armchair"
        );
        assert!(!url.contains(' '));
    }

    #[test]
    fn reserved_characters_are_percent_encoded() {
        let url = shopping_url("oak & walnut 50% off #1 sofa?");
        assert_eq!(
            url,
            format!("{SHOPPING_SEARCH_URL}oak+%26+walnut+50%25+off+%231+sofa%3F")
        );
        let unicode = shopping_url("café chair");
        assert!(unicode.ends_with("caf%C3%A9+chair"));
    }

    #[test]
    fn link_derivation_is_pure() {
        let item = FurnitureItem::new("Lamp", "Brass", "brass arc floor lamp");
        assert_eq!(to_shopping_link(&item), to_shopping_link(&item.clone()));
        assert_eq!(item.shopping_link(), to_shopping_link(&item));
    }

    #[test]
    fn empty_query_still_yields_a_well_formed_url() {
        assert_eq!(shopping_url(""), SHOPPING_SEARCH_URL);
    }

    #[test]
    fn links_keep_item_order() {
        let items = vec![
            FurnitureItem::new("Sofa", "Teal", "teal sofa"),
            FurnitureItem::new("Rug", "Cream", "cream wool rug"),
        ];
        let links = shopping_links(&items);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].name, "Sofa");
        assert!(links[1].url.ends_with("q=cream+wool+rug"));
    }
}
