mod ai_banner;
mod personal_record;
mod weather;

pub use ai_banner::AiBannerEnricher;
pub use personal_record::PersonalRecordEnricher;
pub use weather::WeatherEnricher;
