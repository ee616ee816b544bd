use std::fmt;

use serde::{Deserialize, Serialize};

/// Car class used for class leaderboards and reference curve lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CarClass {
    Gt3,
    Gt4,
    St15,
    St21,
    Chl,
    Cup17,
    Cup21,
    Tcx,
    Unknown,
}

impl CarClass {
    /// Every class with a potential reference lap, in load order
    pub const ALL: [CarClass; 8] = [
        CarClass::Gt3,
        CarClass::Gt4,
        CarClass::Tcx,
        CarClass::Cup21,
        CarClass::Cup17,
        CarClass::St15,
        CarClass::St21,
        CarClass::Chl,
    ];

    /// Name used in leaderboards and reference data file names
    pub fn name(&self) -> &'static str {
        match self {
            CarClass::Gt3 => "GT3",
            CarClass::Gt4 => "GT4",
            CarClass::St15 => "ST15",
            CarClass::St21 => "ST21",
            CarClass::Chl => "CHL",
            CarClass::Cup17 => "CUP17",
            CarClass::Cup21 => "CUP21",
            CarClass::Tcx => "TCX",
            CarClass::Unknown => "Unknown",
        }
    }

    /// Classes whose reference lap may stand in for this one, most similar first
    pub fn replacements(&self) -> &'static [CarClass] {
        use CarClass::*;
        match self {
            Gt3 => &[Cup21, St21, Cup17, St15, Chl],
            Cup21 => &[Cup17, St21, St15, Chl, Gt3],
            Cup17 => &[Cup21, St21, St15, Chl, Gt3],
            St21 => &[Cup21, Cup17, St15, Chl, Gt3],
            St15 => &[St21, Cup21, Cup17, Chl, Gt3],
            Chl => &[St21, Cup21, Cup17, St15],
            Gt4 | Tcx | Unknown => &[],
        }
    }
}

impl fmt::Display for CarClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Team cup category within a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamCupCategory {
    Overall,
    ProAm,
    Am,
    Silver,
    National,
    Unknown(u8),
}

impl From<u8> for TeamCupCategory {
    fn from(raw: u8) -> Self {
        match raw {
            0 => TeamCupCategory::Overall,
            1 => TeamCupCategory::ProAm,
            2 => TeamCupCategory::Am,
            3 => TeamCupCategory::Silver,
            4 => TeamCupCategory::National,
            other => TeamCupCategory::Unknown(other),
        }
    }
}

/// Tracks known to the simulator, by the id sent in track data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackId {
    BrandsHatch,
    Spa,
    Monza,
    Misano,
    PaulRicard,
    Silverstone,
    Hungaroring,
    Nurburgring,
    Barcelona,
    Zolder,
    Zandvoort,
    Kyalami,
    Bathurst,
    LagunaSeca,
    Suzuka,
    Snetterton,
    OultonPark,
    DoningtonPark,
    Imola,
    Unknown(i32),
}

impl TrackId {
    /// Maps the wire track id onto a known track
    pub fn from_wire(id: i32) -> Self {
        use TrackId::*;
        match id {
            1 => BrandsHatch,
            2 => Spa,
            3 => Monza,
            4 => Misano,
            5 => PaulRicard,
            6 => Silverstone,
            7 => Hungaroring,
            8 => Nurburgring,
            9 => Barcelona,
            10 => Zolder,
            11 => Zandvoort,
            12 => Kyalami,
            13 => Bathurst,
            14 => LagunaSeca,
            15 => Suzuka,
            16 => Snetterton,
            17 => OultonPark,
            18 => DoningtonPark,
            19 => Imola,
            other => Unknown(other),
        }
    }

    /// Offset between the simulator's spline origin and the timing line
    pub fn spline_offset(&self) -> f64 {
        match self {
            TrackId::Silverstone => 0.0207,
            _ => 0.0,
        }
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TrackId::*;
        let name = match self {
            BrandsHatch => "BrandsHatch",
            Spa => "Spa",
            Monza => "Monza",
            Misano => "Misano",
            PaulRicard => "PaulRicard",
            Silverstone => "Silverstone",
            Hungaroring => "Hungaroring",
            Nurburgring => "Nurburgring",
            Barcelona => "Barcelona",
            Zolder => "Zolder",
            Zandvoort => "Zandvoort",
            Kyalami => "Kyalami",
            Bathurst => "Bathurst",
            LagunaSeca => "LagunaSeca",
            Suzuka => "Suzuka",
            Snetterton => "Snetterton",
            OultonPark => "OultonPark",
            DoningtonPark => "DoningtonPark",
            Imola => "Imola",
            Unknown(id) => return write!(f, "Track{}", id),
        };
        f.write_str(name)
    }
}

/// Classification of entries into classes and cups
pub trait Classifier: Send + Sync {
    /// Returns the class of a car model
    fn classify(&self, car_model: u8) -> CarClass;

    /// Returns the cup category for the raw cup byte of an entry
    fn cup_of(&self, raw_cup: u8) -> TeamCupCategory {
        TeamCupCategory::from(raw_cup)
    }
}

/// Classifier backed by the simulator's built-in car model table
#[derive(Debug, Clone, Copy, Default)]
pub struct AccClassifier;

impl Classifier for AccClassifier {
    fn classify(&self, car_model: u8) -> CarClass {
        match car_model {
            0..=8 | 10..=17 | 19..=25 | 30..=34 => CarClass::Gt3,
            9 => CarClass::Cup17,
            18 => CarClass::St15,
            26 => CarClass::Chl,
            27 => CarClass::Tcx,
            28 => CarClass::Cup21,
            29 => CarClass::St21,
            50..=53 | 55..=61 => CarClass::Gt4,
            _ => CarClass::Unknown,
        }
    }
}
