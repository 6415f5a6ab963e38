//! In-process restaurant and product catalogs behind the tool interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_core::domain::decision::ToolKind;
use parley_core::domain::entity::{CATEGORY, CUISINE, LOCATION, SEARCH_TERM};
use parley_core::domain::tool::{ToolErrorKind, ToolParams};

use super::{Tool, ToolFailure};
use crate::extractor::location_label;

const RENDERED_RESULTS: usize = 3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    pub name: String,
    pub cuisine: String,
    pub location: String,
    pub rating: f64,
    pub price_range: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub category: String,
    pub price: f64,
    pub available: bool,
    pub description: String,
}

struct RestaurantSeed(&'static str, &'static str, &'static str, f64, &'static str, &'static str);

const RESTAURANTS: &[RestaurantSeed] = &[
    RestaurantSeed(
        "Nasi Lemak Wanjo",
        "Malaysian",
        "SS2, Petaling Jaya",
        4.5,
        "$",
        "Famous nasi lemak with sambal and fried chicken",
    ),
    RestaurantSeed(
        "Dim Sum Garden",
        "Chinese",
        "Mid Valley, Kuala Lumpur",
        4.2,
        "$$",
        "Handmade dim sum served all day",
    ),
    RestaurantSeed(
        "Roti Canai Corner",
        "Indian",
        "SS2, Petaling Jaya",
        4.3,
        "$",
        "Crispy roti canai with dhal and curry",
    ),
    RestaurantSeed(
        "Sakura Japanese Cuisine",
        "Japanese",
        "1 Utama, Petaling Jaya",
        4.6,
        "$$$",
        "Sushi, sashimi and set meals",
    ),
    RestaurantSeed(
        "Pizza Margherita",
        "Italian",
        "Mid Valley, Kuala Lumpur",
        4.1,
        "$$",
        "Wood-fired pizza and fresh pasta",
    ),
    RestaurantSeed(
        "Tom Yum Thai",
        "Thai",
        "SS2, Petaling Jaya",
        4.4,
        "$$",
        "Spicy tom yum and Thai street food",
    ),
    RestaurantSeed(
        "Burger Junction",
        "American",
        "1 Utama, Petaling Jaya",
        4.0,
        "$$",
        "Gourmet burgers and milkshakes",
    ),
    RestaurantSeed(
        "Laksa Johor",
        "Malaysian",
        "Mid Valley, Kuala Lumpur",
        4.7,
        "$",
        "Johor-style laksa with spaghetti noodles",
    ),
    RestaurantSeed(
        "Sushi Express",
        "Japanese",
        "SS2, Petaling Jaya",
        3.9,
        "$$",
        "Conveyor belt sushi",
    ),
    RestaurantSeed(
        "Tandoori Palace",
        "Indian",
        "1 Utama, Petaling Jaya",
        4.5,
        "$$$",
        "North Indian cuisine with tandoori specialties",
    ),
];

struct ProductSeed(&'static str, &'static str, f64, bool, &'static str);

const PRODUCTS: &[ProductSeed] = &[
    ProductSeed(
        "Wireless Bluetooth Headphones",
        "Electronics",
        159.99,
        true,
        "Wireless headphones with noise cancellation",
    ),
    ProductSeed(
        "Smart Water Bottle",
        "Health & Fitness",
        45.50,
        true,
        "Insulated water bottle with temperature display",
    ),
    ProductSeed(
        "Organic Green Tea",
        "Food & Beverage",
        12.99,
        true,
        "Organic green tea leaves from Japan",
    ),
    ProductSeed(
        "Ergonomic Office Chair",
        "Furniture",
        299.00,
        false,
        "Adjustable office chair with lumbar support",
    ),
    ProductSeed(
        "Yoga Mat Premium",
        "Health & Fitness",
        35.75,
        true,
        "Non-slip yoga mat with alignment guides",
    ),
    ProductSeed("Smartphone Case", "Electronics", 24.99, true, "Protective case with card holder"),
    ProductSeed(
        "Coffee Beans - Medium Roast",
        "Food & Beverage",
        18.50,
        true,
        "Single-origin coffee beans from Colombia",
    ),
    ProductSeed(
        "LED Desk Lamp",
        "Home & Garden",
        67.99,
        true,
        "Adjustable LED desk lamp with USB charging port",
    ),
    ProductSeed(
        "Protein Powder - Vanilla",
        "Health & Fitness",
        89.99,
        true,
        "Whey protein powder, vanilla flavour",
    ),
    ProductSeed(
        "Mechanical Keyboard",
        "Electronics",
        149.99,
        false,
        "Mechanical keyboard with hot-swappable switches",
    ),
    ProductSeed(
        "Ceramic Dinner Set",
        "Home & Garden",
        125.00,
        true,
        "Sixteen-piece ceramic dinner set",
    ),
    ProductSeed(
        "Running Shoes",
        "Fashion",
        89.99,
        true,
        "Lightweight running shoes with breathable mesh",
    ),
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RestaurantSearchResult {
    pub cuisine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub restaurants: Vec<Restaurant>,
}

impl RestaurantSearchResult {
    pub fn render(&self) -> String {
        let place = self
            .location
            .as_deref()
            .map(|key| format!(" in {}", location_label(key).unwrap_or(key)))
            .unwrap_or_default();

        if self.restaurants.is_empty() {
            return format!("I couldn't find any {} restaurants{place}.", self.cuisine);
        }

        let listed = self
            .restaurants
            .iter()
            .take(RENDERED_RESULTS)
            .map(|restaurant| {
                format!(
                    "{} ({}, rated {:.1}, {})",
                    restaurant.name, restaurant.location, restaurant.rating, restaurant.price_range
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        format!("Here are some {} restaurants{place}: {listed}.", self.cuisine)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductSearchResult {
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
    pub products: Vec<Product>,
}

impl ProductSearchResult {
    pub fn render(&self) -> String {
        let matching = self
            .search_term
            .as_deref()
            .map(|term| format!(" matching \"{term}\""))
            .unwrap_or_default();

        if self.products.is_empty() {
            return format!("I couldn't find any {} products{matching}.", self.category);
        }

        let listed = self
            .products
            .iter()
            .take(RENDERED_RESULTS)
            .map(|product| {
                let stock = if product.available { "in stock" } else { "out of stock" };
                format!("{} ({:.2}, {stock})", product.name, product.price)
            })
            .collect::<Vec<_>>()
            .join("; ");
        format!("Here are some {} products{matching}: {listed}.", self.category)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RestaurantSearchTool;

#[async_trait]
impl Tool for RestaurantSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::RestaurantSearch
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[CUISINE]
    }

    async fn execute(&self, params: &ToolParams) -> Result<Value, ToolFailure> {
        let cuisine = text_param(params, CUISINE)?;
        let location = params.text(LOCATION);
        let place = location.map(|key| location_label(key).unwrap_or(key).to_lowercase());

        let mut restaurants: Vec<Restaurant> = RESTAURANTS
            .iter()
            .filter(|seed| seed.1.eq_ignore_ascii_case(cuisine))
            .filter(|seed| {
                place.as_deref().map_or(true, |place| seed.2.to_lowercase().contains(place))
            })
            .map(|seed| Restaurant {
                name: seed.0.to_string(),
                cuisine: seed.1.to_string(),
                location: seed.2.to_string(),
                rating: seed.3,
                price_range: seed.4.to_string(),
                description: seed.5.to_string(),
            })
            .collect();
        restaurants.sort_by(|left, right| right.rating.total_cmp(&left.rating));

        encode(RestaurantSearchResult {
            cuisine: cuisine.to_string(),
            location: location.map(str::to_string),
            restaurants,
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ProductSearchTool;

#[async_trait]
impl Tool for ProductSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ProductSearch
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[CATEGORY]
    }

    async fn execute(&self, params: &ToolParams) -> Result<Value, ToolFailure> {
        let category = text_param(params, CATEGORY)?;
        let search_term = params.text(SEARCH_TERM);
        let needle = search_term.map(str::to_lowercase);

        let mut products: Vec<Product> = PRODUCTS
            .iter()
            .filter(|seed| seed.1.eq_ignore_ascii_case(category))
            .filter(|seed| {
                needle.as_deref().map_or(true, |needle| {
                    seed.0.to_lowercase().contains(needle) || seed.4.to_lowercase().contains(needle)
                })
            })
            .map(|seed| Product {
                name: seed.0.to_string(),
                category: seed.1.to_string(),
                price: seed.2,
                available: seed.3,
                description: seed.4.to_string(),
            })
            .collect();
        // In-stock items first, then cheapest.
        products.sort_by(|left, right| {
            right.available.cmp(&left.available).then(left.price.total_cmp(&right.price))
        });

        encode(ProductSearchResult {
            category: category.to_string(),
            search_term: search_term.map(str::to_string),
            products,
        })
    }
}

fn text_param<'a>(params: &'a ToolParams, name: &str) -> Result<&'a str, ToolFailure> {
    let value = params
        .text(name)
        .ok_or_else(|| ToolFailure::new(ToolErrorKind::MissingParam, format!("{name} must be text")))?;
    if value.trim().is_empty() {
        return Err(ToolFailure::new(ToolErrorKind::ValidationFailed, format!("{name} is blank")));
    }
    Ok(value.trim())
}

fn encode<T: Serialize>(result: T) -> Result<Value, ToolFailure> {
    serde_json::to_value(result)
        .map_err(|error| ToolFailure::new(ToolErrorKind::ValidationFailed, error.to_string()))
}
