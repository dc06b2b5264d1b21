//! Carga del corpus tabular (CSV) y generación de los documentos a indexar.
//!
//! Cada fila aporta los metadatos de una fuente. El cuerpo del documento sale
//! de la columna opcional `Content` o, si no existe, de la biblioteca de temas
//! según palabras clave del título.

use std::{fs::File, io::Read, path::Path, sync::Arc};

use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::CorpusLoadError;
use crate::models::{Document, SourceRecord, SourceType};

pub const REQUIRED_COLUMNS: [&str; 5] = ["Title", "URL", "Type", "Relevance", "Notes"];

/// Una fila del corpus ya validada.
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub record: SourceRecord,
    /// Texto extraído, si el CSV trae la columna `Content`.
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CorpusRow {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "URL")]
    url: String,
    #[serde(rename = "Type")]
    source_type: String,
    #[serde(rename = "Relevance")]
    relevance: String,
    #[serde(rename = "Notes")]
    notes: String,
    #[serde(rename = "Content", default)]
    content: Option<String>,
}

/// Lee el corpus desde un fichero CSV.
pub fn load_corpus(path: &Path) -> Result<Vec<CorpusEntry>, CorpusLoadError> {
    let file = File::open(path).map_err(|source| CorpusLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let entries = load_corpus_from_reader(file)?;
    info!("✅ Cargadas {} fuentes del corpus {}", entries.len(), path.display());
    Ok(entries)
}

/// Lee el corpus desde cualquier lector con formato CSV y cabecera.
pub fn load_corpus_from_reader<R: Read>(reader: R) -> Result<Vec<CorpusEntry>, CorpusLoadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(CorpusLoadError::MissingColumns { missing });
    }

    let mut entries = Vec::new();
    for (idx, row) in csv_reader.deserialize::<CorpusRow>().enumerate() {
        // +2: la cabecera es la fila 1
        let row_number = idx + 2;
        let row = row.map_err(|e| CorpusLoadError::MalformedRow {
            row: row_number,
            message: e.to_string(),
        })?;
        if row.title.is_empty() {
            return Err(CorpusLoadError::MalformedRow {
                row: row_number,
                message: "la columna Title está vacía".to_string(),
            });
        }

        entries.push(CorpusEntry {
            record: SourceRecord {
                title: row.title,
                url: row.url,
                source_type: SourceType::parse(&row.source_type),
                relevance: row.relevance,
                notes: row.notes,
            },
            content: row.content.filter(|c| !c.trim().is_empty()),
        });
    }

    Ok(entries)
}

/// Convierte cada entrada del corpus en un documento con su cuerpo de texto.
pub fn build_documents(entries: &[CorpusEntry]) -> Vec<Document> {
    entries
        .iter()
        .map(|entry| {
            let content = match &entry.content {
                Some(text) => text.clone(),
                None => Topic::for_title(&entry.record.title).body().to_string(),
            };
            Document {
                id: Uuid::new_v4().to_string(),
                content,
                source: Arc::new(entry.record.clone()),
            }
        })
        .collect()
}

/// Temas de la biblioteca de contenidos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    ProteinRequirements,
    BmrCalculation,
    TrainingProgression,
    WorkoutSplits,
    Micronutrients,
    Omega3Supplements,
    NeatActivity,
    SleepRecovery,
}

/// Reglas evaluadas en orden; gana la primera que contenga alguna palabra.
const TOPIC_RULES: &[(&[&str], Topic)] = &[
    (&["protein"], Topic::ProteinRequirements),
    (&["bmr", "metabolic"], Topic::BmrCalculation),
    (
        &["training", "workout", "progressive", "resistance"],
        Topic::TrainingProgression,
    ),
    (&["split"], Topic::WorkoutSplits),
    (&["micronutrient", "vitamin", "supplement"], Topic::Micronutrients),
    (&["omega", "fish oil"], Topic::Omega3Supplements),
    (&["neat", "activity"], Topic::NeatActivity),
    (&["sleep"], Topic::SleepRecovery),
    (&["energy", "calorie", "balance"], Topic::BmrCalculation),
    (&["periodization"], Topic::TrainingProgression),
    (&["nutrition", "performance"], Topic::ProteinRequirements),
    (&["cavaliere", "athlean"], Topic::WorkoutSplits),
    (&["jamnadas", "visceral", "fat"], Topic::BmrCalculation),
    (&["attia", "longevity"], Topic::TrainingProgression),
    (&["probiotic"], Topic::Micronutrients),
    (&["myplate", "nhs", "nih"], Topic::Micronutrients),
];

impl Topic {
    pub fn for_title(title: &str) -> Self {
        let title = title.to_lowercase();
        TOPIC_RULES
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| title.contains(k)))
            .map(|(_, topic)| *topic)
            .unwrap_or(Topic::TrainingProgression)
    }

    pub fn body(self) -> &'static str {
        match self {
            Topic::ProteinRequirements => PROTEIN_REQUIREMENTS,
            Topic::BmrCalculation => BMR_CALCULATION,
            Topic::TrainingProgression => TRAINING_PROGRESSION,
            Topic::WorkoutSplits => WORKOUT_SPLITS,
            Topic::Micronutrients => MICRONUTRIENTS,
            Topic::Omega3Supplements => OMEGA3_SUPPLEMENTS,
            Topic::NeatActivity => NEAT_ACTIVITY,
            Topic::SleepRecovery => SLEEP_RECOVERY,
        }
    }
}

const PROTEIN_REQUIREMENTS: &str = "\
Protein Requirements for Resistance Training:

Based on meta-analyses, the optimal protein intake for resistance training is 1.6-2.2g per kg bodyweight per day.
This supports muscle protein synthesis and recovery. Protein should be distributed throughout the day,
with 20-40g per meal to maximize muscle protein synthesis rates.

Key findings from Morton et al. (2017) meta-analysis show that protein intakes above 1.6g/kg/day
provide diminishing returns for muscle hypertrophy. Timing around workouts is less critical than
total daily intake, but consuming protein within 2 hours post-workout can enhance recovery.";

const BMR_CALCULATION: &str = "\
Basal Metabolic Rate (BMR) Calculation:

BMR represents the calories your body burns at rest. The Harris-Benedict equation is commonly used:
- Men: BMR = 88.362 + (13.397 × weight in kg) + (4.799 × height in cm) - (5.677 × age in years)
- Women: BMR = 447.593 + (9.247 × weight in kg) + (3.098 × height in cm) - (4.330 × age in years)

For activity levels, multiply BMR by:
- Sedentary: 1.2 (little/no exercise)
- Lightly active: 1.375 (light exercise 1-3 days/week)
- Moderately active: 1.55 (moderate exercise 3-5 days/week)
- Very active: 1.725 (hard exercise 6-7 days/week)
- Extremely active: 1.9 (very hard exercise, physical job)";

const TRAINING_PROGRESSION: &str = "\
Progressive Overload in Strength Training:

Progressive overload is the gradual increase of stress placed on the body during training.
This can be achieved through:
1. Increasing weight (most common)
2. Increasing reps with same weight
3. Increasing sets
4. Decreasing rest periods
5. Increasing training frequency

For beginners, aim for 2-3 sets of 8-12 reps, 2-3 times per week per muscle group.
Progress should be consistent but gradual - typically 2.5-5lb increases weekly for compound movements.

Recovery is crucial. Allow 48-72 hours between training the same muscle groups.";

const MICRONUTRIENTS: &str = "\
Essential Micronutrients for Fitness:

Key vitamins and minerals for active individuals:
- Vitamin D: Important for muscle function and bone health. 1000-2000 IU daily recommended.
- Magnesium: Supports muscle contraction and energy production. 400-600mg daily.
- Iron: Critical for oxygen transport. Women need 18mg, men 8mg daily.
- Zinc: Supports immune function and protein synthesis. 8-11mg daily.
- B-vitamins: Essential for energy metabolism and recovery.

Best sources are whole foods, but supplements can help fill gaps.
Consider a multivitamin if diet is inconsistent.";

const OMEGA3_SUPPLEMENTS: &str = "\
Omega-3 Fatty Acids and Fish Oil:

Omega-3 fatty acids (EPA and DHA) are essential fats that support heart health, brain function, and inflammation control.
For general health: 1-2g daily (1000-2000mg)
For cardiovascular benefits: 2-4g daily
For athletes: 2-3g daily may help with recovery and inflammation

Look for supplements with high EPA/DHA content (500mg+ combined per capsule).
Take with meals to improve absorption and reduce fishy aftertaste.
Quality matters - choose reputable brands with third-party testing.

If you eat fatty fish (salmon, mackerel, sardines) 2-3 times per week, you may need less supplementation.";

const NEAT_ACTIVITY: &str = "\
NEAT (Non-Exercise Activity Thermogenesis):

NEAT includes all daily activities outside of formal exercise: walking, fidgeting,
standing, household chores, etc. NEAT can vary by 200-900 calories daily between individuals.

To increase NEAT:
- Take stairs instead of elevators
- Walk during phone calls
- Use a standing desk
- Park farther from destinations
- Do household chores actively

Tracking steps (aim for 8,000-12,000 daily) is a good NEAT proxy.";

const SLEEP_RECOVERY: &str = "\
Sleep and Athletic Recovery:

Sleep is crucial for athletic performance and recovery. Adults need 7-9 hours of quality sleep nightly.
During sleep, the body releases growth hormone, repairs muscle tissue, and consolidates motor learning.

Poor sleep negatively affects:
- Muscle protein synthesis
- Immune function
- Cognitive performance
- Injury risk
- Appetite regulation

For optimal sleep:
- Maintain consistent sleep schedule
- Create cool, dark environment (65-68°F)
- Avoid screens 1 hour before bed
- Limit caffeine after 2pm
- Consider meditation or relaxation techniques";

const WORKOUT_SPLITS: &str = "\
Training Program Design and Workout Splits:

Effective workout splits depend on training experience and goals:

Beginners: Full-body workouts 2-3x per week
- Focus on compound movements
- 2-3 sets of 8-12 reps
- Allow 48-72 hours between sessions

Intermediate: Upper/lower split 4x per week
- Monday: Upper body
- Tuesday: Lower body
- Thursday: Upper body
- Friday: Lower body

Advanced: Push/pull/legs or body part splits
- Push: Chest, shoulders, triceps
- Pull: Back, biceps
- Legs: Quads, hamstrings, glutes

Key principles:
- Train each muscle group 2-3x per week
- Progressive overload
- Adequate recovery between sessions
- Focus on compound movements first";
