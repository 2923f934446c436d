//! Keyword lexicon and gazetteer for the Rio de Janeiro metro area.
//!
//! Keywords are lowercase and matched as plain substrings, so stems like
//! `rouba` also catch `roubado` and `roubaram`.

use safedrive_common::Category;

/// Keywords that put a report in `category`.
pub fn category_keywords(category: Category) -> &'static [&'static str] {
    match category {
        Category::Sequestro => &["sequestro", "sequestra", "refém", "cativeiro"],
        Category::Roubo => &[
            "roubo", "assalto", "assalta", "rouba", "bandido", "armado", "rendido",
        ],
        Category::Furto => &["furto", "furta", "furtado", "subtraiu"],
    }
}

/// Neighborhoods and regions with a representative coordinate.
pub const GAZETTEER: &[(&str, f64, f64)] = &[
    ("Copacabana", -22.971177, -43.182543),
    ("Ipanema", -22.983889, -43.204722),
    ("Leblon", -22.984444, -43.219722),
    ("Botafogo", -22.951389, -43.182778),
    ("Flamengo", -22.933333, -43.175),
    ("Centro", -22.903889, -43.188333),
    ("Lapa", -22.912778, -43.179722),
    ("Santa Teresa", -22.918611, -43.188611),
    ("Tijuca", -22.925556, -43.237778),
    ("Vila Isabel", -22.916111, -43.245556),
    ("Barra da Tijuca", -23.003611, -43.364722),
    ("Recreio", -23.020556, -43.463333),
    ("Jacarepaguá", -22.936389, -43.360278),
    ("Madureira", -22.870833, -43.337222),
    ("Campo Grande", -22.901944, -43.5625),
    ("Bangu", -22.875833, -43.465833),
    ("Realengo", -22.881667, -43.433333),
    ("Duque de Caxias", -22.785556, -43.305278),
    ("Nova Iguaçu", -22.759444, -43.451111),
    ("São Gonçalo", -22.826667, -43.053333),
    ("Niterói", -22.883056, -43.103889),
    ("Rocinha", -22.987222, -43.249444),
    ("Complexo do Alemão", -22.863056, -43.262222),
    ("Cidade de Deus", -22.945, -43.363056),
    ("Maré", -22.866667, -43.243333),
    ("Zona Norte", -22.899, -43.279),
    ("Zona Sul", -22.971, -43.182),
    ("Zona Oeste", -22.936, -43.360),
    ("Baixada Fluminense", -22.785, -43.305),
];
