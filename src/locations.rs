//! Static country/city lookup offered to clients when picking a location.

/// Countries with the cities jobs are usually run for.
const LOCATIONS: &[(&str, &[&str])] = &[
    (
        "United States",
        &["New York", "Los Angeles", "Chicago", "Houston", "Phoenix"],
    ),
    (
        "United Kingdom",
        &["London", "Manchester", "Birmingham", "Liverpool", "Glasgow"],
    ),
    ("India", &["Mumbai", "Delhi", "Bangalore", "Chennai", "Kolkata"]),
];

/// Every known country, sorted.
pub fn countries() -> Vec<&'static str> {
    let mut countries: Vec<&str> = LOCATIONS.iter().map(|(country, _)| *country).collect();
    countries.sort_unstable();
    countries
}

/// Cities for `country`, sorted. Unknown countries have none.
pub fn cities(country: &str) -> Vec<&'static str> {
    let mut cities: Vec<&str> = LOCATIONS
        .iter()
        .find(|(name, _)| *name == country)
        .map(|(_, cities)| cities.to_vec())
        .unwrap_or_default();
    cities.sort_unstable();
    cities
}
