use dotenv::dotenv;
use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub jwt_secret: String,
    pub checkin_radius_m: f64,
    pub platform_fee_bps: i64,
    pub card_fee_bps: i64,
}

impl AppConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv().ok(); // Load .env file if present
        Ok(Self {
            port: env::var("PORT").unwrap_or_else(|_| "8080".to_string()).parse()?,
            jwt_secret: env::var("JWT_SECRET")?,
            checkin_radius_m: env::var("CHECKIN_RADIUS_M")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            platform_fee_bps: env::var("PLATFORM_FEE_BPS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            card_fee_bps: env::var("CARD_FEE_BPS")
                .unwrap_or_else(|_| "290".to_string())
                .parse()?,
        })
    }

    pub fn settings(&self) -> Settings {
        Settings {
            allowed_radius_m: self.checkin_radius_m,
            platform_fee_bps: self.platform_fee_bps,
            card_fee_bps: self.card_fee_bps,
        }
    }
}

/// The engine-facing subset of the configuration.
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    pub allowed_radius_m: f64,
    pub platform_fee_bps: i64,
    pub card_fee_bps: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            allowed_radius_m: 50.0,
            platform_fee_bps: 100, // 1%
            card_fee_bps: 290,     // 2.9%
        }
    }
}
