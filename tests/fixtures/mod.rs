//! Test fixtures: photos, batch contexts and recognition payloads

#![allow(dead_code)]

use chrono::NaiveDate;
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageBuffer, Rgb};

use eatfit_photo_batch::models::queue::{BatchContext, MealType, PhotoInput, PhotoSource};
use eatfit_photo_batch::models::recognition::{MealId, RecognitionPayload, RecognizedItem};

/// Small JPEG that the preparer uploads untouched.
pub fn jpeg_bytes() -> Vec<u8> {
    let img = ImageBuffer::from_pixel(8, 8, Rgb([180u8, 90, 30]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_with_encoder(JpegEncoder::new_with_quality(&mut out, 80))
        .expect("encode fixture jpeg");
    out
}

/// In-memory JPEG photo; the uploaded file name equals `name`.
pub fn photo(name: &str) -> PhotoInput {
    PhotoInput::new(PhotoSource::Bytes {
        file_name: name.to_string(),
        data: jpeg_bytes(),
    })
}

/// A file that is not an image at all.
pub fn text_file(name: &str) -> PhotoInput {
    PhotoInput::new(PhotoSource::Bytes {
        file_name: name.to_string(),
        data: b"grocery list: eggs, milk".to_vec(),
    })
}

pub fn context() -> BatchContext {
    BatchContext {
        date: NaiveDate::from_ymd_opt(2026, 10, 18).expect("valid date"),
        meal_type: MealType::Lunch,
        meal_id: None,
    }
}

pub fn food(name: &str, calories: f64) -> RecognizedItem {
    RecognizedItem {
        name: name.to_string(),
        grams: 150.0,
        calories,
        protein: 10.0,
        fat: 5.0,
        carbohydrates: 20.0,
        confidence: Some(0.9),
    }
}

pub fn payload(meal_id: Option<MealId>, items: Vec<RecognizedItem>) -> RecognitionPayload {
    RecognitionPayload {
        meal_id,
        items,
        totals: None,
    }
}
