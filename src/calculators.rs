//! Calculadoras de energía: BMR (Harris-Benedict), TDEE, NEAT y conversión
//! de unidades. Funciones puras, independientes del índice.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::InvalidInputError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
}

const SEX_SYNONYMS: [(&str, Sex); 6] = [
    ("male", Sex::Male),
    ("m", Sex::Male),
    ("man", Sex::Male),
    ("female", Sex::Female),
    ("f", Sex::Female),
    ("woman", Sex::Female),
];

impl FromStr for Sex {
    type Err = InvalidInputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        SEX_SYNONYMS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, sex)| *sex)
            .ok_or_else(|| InvalidInputError {
                field: "sex",
                value: s.to_string(),
                accepted: SEX_SYNONYMS.iter().map(|(n, _)| n.to_string()).collect(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityLevel {
    Sedentary,
    LightlyActive,
    ModeratelyActive,
    VeryActive,
    ExtremelyActive,
}

const ACTIVITY_LEVELS: [(&str, ActivityLevel); 5] = [
    ("sedentary", ActivityLevel::Sedentary),
    ("lightly_active", ActivityLevel::LightlyActive),
    ("moderately_active", ActivityLevel::ModeratelyActive),
    ("very_active", ActivityLevel::VeryActive),
    ("extremely_active", ActivityLevel::ExtremelyActive),
];

impl ActivityLevel {
    pub fn multiplier(self) -> f64 {
        match self {
            ActivityLevel::Sedentary => 1.2,
            ActivityLevel::LightlyActive => 1.375,
            ActivityLevel::ModeratelyActive => 1.55,
            ActivityLevel::VeryActive => 1.725,
            ActivityLevel::ExtremelyActive => 1.9,
        }
    }
}

impl FromStr for ActivityLevel {
    type Err = InvalidInputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");
        ACTIVITY_LEVELS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, level)| *level)
            .ok_or_else(|| InvalidInputError {
                field: "activity_level",
                value: s.to_string(),
                accepted: ACTIVITY_LEVELS.iter().map(|(n, _)| n.to_string()).collect(),
            })
    }
}

/// Nivel de actividad fuera del ejercicio (NEAT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeatLevel {
    Low,
    Moderate,
    High,
}

const NEAT_LEVELS: [(&str, NeatLevel); 3] = [
    ("low", NeatLevel::Low),
    ("moderate", NeatLevel::Moderate),
    ("high", NeatLevel::High),
];

impl NeatLevel {
    /// kcal/día añadidas al TDEE.
    pub fn calories(self) -> f64 {
        match self {
            NeatLevel::Low => 300.0,
            NeatLevel::Moderate => 500.0,
            NeatLevel::High => 750.0,
        }
    }
}

impl FromStr for NeatLevel {
    type Err = InvalidInputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        NEAT_LEVELS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, level)| *level)
            .ok_or_else(|| InvalidInputError {
                field: "neat_level",
                value: s.to_string(),
                accepted: NEAT_LEVELS.iter().map(|(n, _)| n.to_string()).collect(),
            })
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn positive(field: &'static str, value: f64) -> Result<f64, InvalidInputError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(InvalidInputError {
            field,
            value: value.to_string(),
            accepted: vec!["número positivo".to_string()],
        })
    }
}

/// Metabolismo basal (Harris-Benedict revisada) en kcal/día, redondeado a un decimal.
pub fn bmr(weight_kg: f64, height_cm: f64, age: u32, sex: &str) -> Result<f64, InvalidInputError> {
    let sex: Sex = sex.parse()?;
    let w = positive("weight_kg", weight_kg)?;
    let h = positive("height_cm", height_cm)?;
    let a = f64::from(age);
    let value = match sex {
        Sex::Male => 88.362 + 13.397 * w + 4.799 * h - 5.677 * a,
        Sex::Female => 447.593 + 9.247 * w + 3.098 * h - 4.330 * a,
    };
    Ok(round1(value))
}

/// Gasto energético total: `bmr` por el factor de actividad, a un decimal.
pub fn tdee(bmr: f64, activity_level: &str) -> Result<f64, InvalidInputError> {
    let level: ActivityLevel = activity_level.parse()?;
    Ok(round1(bmr * level.multiplier()))
}

pub fn neat(level: &str) -> Result<f64, InvalidInputError> {
    Ok(level.parse::<NeatLevel>()?.calories())
}

pub fn lbs_to_kg(lbs: f64) -> f64 {
    lbs * 0.453592
}

pub fn feet_inches_to_cm(feet: f64, inches: f64) -> f64 {
    (feet * 12.0 + inches) * 2.54
}

/// Datos de entrada de `/api/calculate`, en unidades métricas o imperiales.
#[derive(Debug, Clone, Deserialize)]
pub struct EnergyProfile {
    pub sex: String,
    pub age: u32,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub weight_lbs: Option<f64>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub height_ft: Option<f64>,
    #[serde(default)]
    pub height_in: Option<f64>,
    pub activity_level: String,
    #[serde(default)]
    pub neat_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyEstimate {
    pub weight_kg: f64,
    pub height_cm: f64,
    pub bmr: f64,
    pub tdee: f64,
    pub neat: f64,
    pub total_daily: f64,
}

impl EnergyProfile {
    pub fn estimate(&self) -> Result<EnergyEstimate, InvalidInputError> {
        let weight_kg = match (self.weight_kg, self.weight_lbs) {
            (Some(kg), _) => kg,
            (None, Some(lbs)) => lbs_to_kg(lbs),
            (None, None) => return Err(missing("weight_kg", &["weight_kg", "weight_lbs"])),
        };
        let height_cm = match (self.height_cm, self.height_ft) {
            (Some(cm), _) => cm,
            (None, Some(ft)) => feet_inches_to_cm(ft, self.height_in.unwrap_or(0.0)),
            (None, None) => return Err(missing("height_cm", &["height_cm", "height_ft + height_in"])),
        };

        let bmr = bmr(weight_kg, height_cm, self.age, &self.sex)?;
        let tdee = tdee(bmr, &self.activity_level)?;
        let neat = match &self.neat_level {
            Some(level) => neat(level)?,
            None => 0.0,
        };
        Ok(EnergyEstimate {
            weight_kg: round1(weight_kg),
            height_cm: round1(height_cm),
            bmr,
            tdee,
            neat,
            total_daily: round1(tdee + neat),
        })
    }
}

fn missing(field: &'static str, accepted: &[&str]) -> InvalidInputError {
    InvalidInputError {
        field,
        value: String::new(),
        accepted: accepted.iter().map(|s| s.to_string()).collect(),
    }
}
