/// Primary place types supported by Places Nearby Search, searched by default.
///
/// See: https://developers.google.com/maps/documentation/places/web-service/supported_types
pub const DEFAULT_PLACE_TYPES: [&str; 97] = [
    "accounting",
    "airport",
    "amusement_park",
    "aquarium",
    "art_gallery",
    "atm",
    "bakery",
    "bank",
    "bar",
    "beauty_salon",
    "bicycle_store",
    "book_store",
    "bowling_alley",
    "bus_station",
    "cafe",
    "campground",
    "car_dealer",
    "car_rental",
    "car_repair",
    "car_wash",
    "casino",
    "cemetery",
    "church",
    "city_hall",
    "clothing_store",
    "convenience_store",
    "courthouse",
    "dentist",
    "department_store",
    "doctor",
    "drugstore",
    "electrician",
    "electronics_store",
    "embassy",
    "fire_station",
    "florist",
    "funeral_home",
    "furniture_store",
    "gas_station",
    "grocery_or_supermarket",
    "gym",
    "hair_care",
    "hardware_store",
    "hindu_temple",
    "home_goods_store",
    "hospital",
    "insurance_agency",
    "jewelry_store",
    "laundry",
    "lawyer",
    "library",
    "light_rail_station",
    "liquor_store",
    "local_government_office",
    "locksmith",
    "lodging",
    "meal_delivery",
    "meal_takeaway",
    "mosque",
    "movie_rental",
    "movie_theater",
    "moving_company",
    "museum",
    "night_club",
    "painter",
    "park",
    "parking",
    "pet_store",
    "pharmacy",
    "physiotherapist",
    "plumber",
    "police",
    "post_office",
    "primary_school",
    "real_estate_agency",
    "restaurant",
    "roofing_contractor",
    "rv_park",
    "school",
    "secondary_school",
    "shoe_store",
    "shopping_mall",
    "spa",
    "stadium",
    "storage",
    "store",
    "subway_station",
    "supermarket",
    "synagogue",
    "taxi_stand",
    "tourist_attraction",
    "train_station",
    "transit_station",
    "travel_agency",
    "university",
    "veterinary_care",
    "zoo",
];

pub fn default_place_types() -> Vec<String> {
    DEFAULT_PLACE_TYPES.iter().map(|t| t.to_string()).collect()
}

/// The given place types, or every default type when none are given.
pub fn place_types_or_default(place_types: &[String]) -> Vec<String> {
    if place_types.is_empty() {
        default_place_types()
    } else {
        place_types.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn default_types_are_unique() {
        let unique: HashSet<&str> = DEFAULT_PLACE_TYPES.iter().copied().collect();
        assert_eq!(unique.len(), DEFAULT_PLACE_TYPES.len());
    }

    #[test]
    fn falls_back_to_default_types_only_when_none_given() {
        assert_eq!(place_types_or_default(&[]).len(), 97);
        let chosen = vec!["zoo".to_string(), "cafe".to_string()];
        assert_eq!(place_types_or_default(&chosen), chosen);
    }
}
