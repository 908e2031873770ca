//! Identifier family table.
//!
//! Each entry pairs the raw shapes `find` looks for with a claim predicate and
//! a canonicalizer. Adding a family is a new row here, nothing else.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::RegistryError;

/// Class of vulnerability identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FamilyTag {
    Cve,
    Bid,
    Osvdb,
    Vu,
    Icsa,
    Uvi,
    Ms,
    Zdi,
    Zsl,
    Cnvd,
    Cnnvd,
    Gpz,
}

impl FamilyTag {
    pub const ALL: [FamilyTag; 12] = [
        FamilyTag::Cve,
        FamilyTag::Bid,
        FamilyTag::Osvdb,
        FamilyTag::Vu,
        FamilyTag::Icsa,
        FamilyTag::Uvi,
        FamilyTag::Ms,
        FamilyTag::Zdi,
        FamilyTag::Zsl,
        FamilyTag::Cnvd,
        FamilyTag::Cnnvd,
        FamilyTag::Gpz,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FamilyTag::Cve => "CVE",
            FamilyTag::Bid => "BID",
            FamilyTag::Osvdb => "OSVDB",
            FamilyTag::Vu => "VU",
            FamilyTag::Icsa => "ICSA",
            FamilyTag::Uvi => "UVI",
            FamilyTag::Ms => "MS",
            FamilyTag::Zdi => "ZDI",
            FamilyTag::Zsl => "ZSL",
            FamilyTag::Cnvd => "CNVD",
            FamilyTag::Cnnvd => "CNNVD",
            FamilyTag::Gpz => "GPZ",
        }
    }
}

impl fmt::Display for FamilyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FamilyTag {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().trim_end_matches('#').to_uppercase();
        FamilyTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == upper)
            .ok_or_else(|| RegistryError::UnknownFamily(s.to_string()))
    }
}

impl TryFrom<String> for FamilyTag {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FamilyTag> for String {
    fn from(tag: FamilyTag) -> Self {
        tag.as_str().to_string()
    }
}

/// One row of the family table.
///
/// `claim` and `canonical` run against the upper-cased raw match and are
/// anchored at the start. `template` is expanded with the named groups of
/// `canonical`. A `bounded` family only counts when the match is not glued
/// to a letter or digit before it or a digit after it; `_` and `-` count as
/// separators.
pub(crate) struct FamilySpec {
    pub tag: FamilyTag,
    pub shapes: &'static [&'static str],
    pub claim: &'static str,
    pub canonical: &'static str,
    pub template: &'static str,
    pub bounded: bool,
}

/// Families in dispatch order. More specific prefixes come first.
pub(crate) const FAMILIES: &[FamilySpec] = &[
    FamilySpec {
        tag: FamilyTag::Cve,
        shapes: &[
            r"CVE[-_][0-9]{4}[-_][0-9]+",
            // module metadata style: 'CVE', '2020-1234'
            r"CVE.?,\s+.?[0-9]{4}-[0-9]+",
            // exploit-db headers: CVE : 2020-1234
            r"CVE\s*:\s*[0-9]{4}-[0-9]+",
        ],
        claim: r"^CVE",
        canonical: r"^CVE\D+(?P<year>\d{4})[-_](?P<num>\d+)",
        template: "CVE-${year}-${num}",
        bounded: false,
    },
    FamilySpec {
        tag: FamilyTag::Bid,
        shapes: &[
            r"BID[-_]\d+",
            r"BID.?,\s+.?\d+",
            r"securityfocus\.com/bid/\d+",
        ],
        claim: r"^(?:BID|SECURITYFOCUS\.COM/BID/)",
        canonical: r"^(?:SECURITYFOCUS\.COM/BID/|BID\D+)(?P<num>\d+)",
        template: "BID-${num}",
        bounded: false,
    },
    FamilySpec {
        tag: FamilyTag::Osvdb,
        shapes: &[
            r"OSVDB[-_]\d+",
            r"OSVDB.?,\s+.?\d+",
            r"osvdb\.org/show/osvdb/\d+",
            r"osvdb\.org/\d+",
        ],
        claim: r"^OSVDB",
        canonical: r"^(?:OSVDB\.ORG/(?:SHOW/OSVDB/)?|OSVDB\D+)(?P<num>\d+)",
        template: "OSVDB-${num}",
        bounded: false,
    },
    FamilySpec {
        tag: FamilyTag::Vu,
        shapes: &[r"VU#[0-9]{2,}", r"kb\.cert\.org/vuls/id/\d+"],
        claim: r"^(?:VU|KB\.CERT\.ORG/VULS/ID/)",
        canonical: r"^(?:KB\.CERT\.ORG/VULS/ID/|VU\D+)(?P<num>\d+)",
        template: "VU#${num}",
        bounded: false,
    },
    FamilySpec {
        tag: FamilyTag::Icsa,
        shapes: &[r"ICSA[-_]\d{2}[-_]\d{3}[-_]\d{2}(?:[a-z]\b)?"],
        claim: r"^ICSA",
        canonical: r"^ICSA[-_](?P<yy>\d{2})[-_](?P<day>\d{3})[-_](?P<seq>\d{2})(?P<suffix>[A-Z]?)",
        template: "ICSA-${yy}-${day}-${seq}${suffix}",
        bounded: false,
    },
    FamilySpec {
        tag: FamilyTag::Uvi,
        shapes: &[r"UVI[-_]\d{4}[-_]\d+"],
        claim: r"^UVI",
        canonical: r"^UVI[-_](?P<year>\d{4})[-_](?P<num>\d+)",
        template: "UVI-${year}-${num}",
        bounded: false,
    },
    FamilySpec {
        tag: FamilyTag::Ms,
        shapes: &[r"MS\d{2}[-_]\d{3}"],
        claim: r"^MS\d",
        canonical: r"^MS(?P<yy>\d{2})[-_](?P<num>\d{3})",
        template: "MS${yy}-${num}",
        bounded: true,
    },
    FamilySpec {
        tag: FamilyTag::Zdi,
        shapes: &[r"ZDI[-_]CAN[-_]\d+"],
        claim: r"^ZDI[-_]CAN",
        canonical: r"^ZDI[-_]CAN[-_](?P<num>\d+)",
        template: "ZDI-CAN-${num}",
        bounded: false,
    },
    FamilySpec {
        tag: FamilyTag::Zdi,
        shapes: &[r"ZDI[-_]\d{2}[-_]\d+"],
        claim: r"^ZDI",
        canonical: r"^ZDI[-_](?P<yy>\d{2})[-_](?P<num>\d+)",
        template: "ZDI-${yy}-${num}",
        bounded: false,
    },
    FamilySpec {
        tag: FamilyTag::Zsl,
        shapes: &[r"ZSL[-_]\d{4}[-_]\d+"],
        claim: r"^ZSL",
        canonical: r"^ZSL[-_](?P<year>\d{4})[-_](?P<num>\d+)",
        template: "ZSL-${year}-${num}",
        bounded: false,
    },
    FamilySpec {
        tag: FamilyTag::Cnvd,
        shapes: &[r"CNVD[-_]C[-_]\d{4}[-_]\d+"],
        claim: r"^CNVD[-_]C[-_]",
        canonical: r"^CNVD[-_]C[-_](?P<year>\d{4})[-_](?P<num>\d+)",
        template: "CNVD-C-${year}-${num}",
        bounded: false,
    },
    FamilySpec {
        tag: FamilyTag::Cnvd,
        shapes: &[r"CNVD[-_]\d{4}[-_]\d+"],
        claim: r"^CNVD",
        canonical: r"^CNVD[-_](?P<year>\d{4})[-_](?P<num>\d+)",
        template: "CNVD-${year}-${num}",
        bounded: false,
    },
    FamilySpec {
        tag: FamilyTag::Cnnvd,
        shapes: &[r"CNNVD[-_]\d{6}[-_]\d+"],
        claim: r"^CNNVD",
        canonical: r"^CNNVD[-_](?P<month>\d{6})[-_](?P<num>\d+)",
        template: "CNNVD-${month}-${num}",
        bounded: false,
    },
    FamilySpec {
        tag: FamilyTag::Gpz,
        shapes: &[
            r"GPZ[-_]\d+",
            r"bugs\.chromium\.org/p/project-zero/issues/detail\?id=\d+",
        ],
        claim: r"^(?:GPZ|BUGS\.CHROMIUM\.ORG/P/PROJECT-ZERO/)",
        canonical: r"^(?:BUGS\.CHROMIUM\.ORG/P/PROJECT-ZERO/ISSUES/DETAIL\?ID=|GPZ[-_])(?P<num>\d+)",
        template: "GPZ-${num}",
        bounded: false,
    },
];
