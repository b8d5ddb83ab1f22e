//! pprof wire format for instantaneous snapshots.
//!
//! Only the subset of `profile.proto` needed for label-keyed value samples:
//! sample types, samples with string labels, the string table, timing and
//! comments. Locations and functions are never emitted. The encoded message
//! is gzip-compressed, matching what `go tool pprof` and the CPU path write.

use std::collections::HashMap;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::write::GzEncoder;
use flate2::Compression;
use prost::Message;

use crate::error::CaptureError;

#[derive(Clone, PartialEq, Message)]
pub struct Profile {
    #[prost(message, repeated, tag = "1")]
    pub sample_type: Vec<ValueType>,
    #[prost(message, repeated, tag = "2")]
    pub sample: Vec<Sample>,
    #[prost(string, repeated, tag = "6")]
    pub string_table: Vec<String>,
    #[prost(int64, tag = "9")]
    pub time_nanos: i64,
    #[prost(int64, tag = "10")]
    pub duration_nanos: i64,
    #[prost(message, optional, tag = "11")]
    pub period_type: Option<ValueType>,
    #[prost(int64, tag = "12")]
    pub period: i64,
    #[prost(int64, repeated, tag = "13")]
    pub comment: Vec<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ValueType {
    #[prost(int64, tag = "1")]
    pub ty: i64,
    #[prost(int64, tag = "2")]
    pub unit: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Sample {
    #[prost(uint64, repeated, tag = "1")]
    pub location_id: Vec<u64>,
    #[prost(int64, repeated, tag = "2")]
    pub value: Vec<i64>,
    #[prost(message, repeated, tag = "3")]
    pub label: Vec<Label>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Label {
    #[prost(int64, tag = "1")]
    pub key: i64,
    #[prost(int64, tag = "2")]
    pub str: i64,
    #[prost(int64, tag = "3")]
    pub num: i64,
    #[prost(int64, tag = "4")]
    pub num_unit: i64,
}

impl Profile {
    /// Resolve a string-table index.
    pub fn string(&self, index: i64) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.string_table.get(i))
            .map(String::as_str)
    }

    /// Value of the string label `key` on `sample`, if present.
    pub fn label<'a>(&'a self, sample: &'a Sample, key: &str) -> Option<&'a str> {
        sample
            .label
            .iter()
            .find(|l| self.string(l.key) == Some(key))
            .and_then(|l| self.string(l.str))
    }
}

/// Incrementally builds a [`Profile`], interning strings as it goes.
#[derive(Debug)]
pub struct ProfileBuilder {
    profile: Profile,
    index: HashMap<String, i64>,
}

impl ProfileBuilder {
    /// `sample_types` are `(type, unit)` pairs, one per sample value.
    pub fn new(sample_types: &[(&str, &str)]) -> Self {
        let mut builder = ProfileBuilder {
            profile: Profile::default(),
            index: HashMap::new(),
        };
        // pprof requires string_table[0] == "".
        builder.intern("");
        for (ty, unit) in sample_types {
            let value_type = ValueType {
                ty: builder.intern(ty),
                unit: builder.intern(unit),
            };
            builder.profile.sample_type.push(value_type);
        }
        builder.profile.time_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        builder
    }

    pub fn intern(&mut self, s: &str) -> i64 {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.profile.string_table.len() as i64;
        self.profile.string_table.push(s.to_string());
        self.index.insert(s.to_string(), i);
        i
    }

    pub fn period(mut self, ty: &str, unit: &str, period: i64) -> Self {
        let period_type = ValueType {
            ty: self.intern(ty),
            unit: self.intern(unit),
        };
        self.profile.period_type = Some(period_type);
        self.profile.period = period;
        self
    }

    pub fn comment(&mut self, text: &str) {
        let i = self.intern(text);
        self.profile.comment.push(i);
    }

    /// Add one sample. `values` must line up with the sample types.
    pub fn sample(&mut self, values: Vec<i64>, labels: &[(&str, &str)]) {
        let label = labels
            .iter()
            .map(|(k, v)| Label {
                key: self.intern(k),
                str: self.intern(v),
                num: 0,
                num_unit: 0,
            })
            .collect();
        self.profile.sample.push(Sample {
            location_id: Vec::new(),
            value: values,
            label,
        });
    }

    pub fn build(self) -> Profile {
        self.profile
    }

    /// Encode and gzip the profile into `sink`.
    pub fn write_gzip(self, sink: &mut dyn Write) -> Result<(), CaptureError> {
        write_gzipped(sink, &self.profile.encode_to_vec())
    }
}

/// Gzip `bytes` into `sink`.
pub fn write_gzipped(sink: &mut dyn Write, bytes: &[u8]) -> Result<(), CaptureError> {
    let mut encoder = GzEncoder::new(sink, Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()?;
    Ok(())
}

/// Decode a gzipped profile written by [`ProfileBuilder::write_gzip`].
pub fn decode_gzipped(bytes: &[u8]) -> Result<Profile, CaptureError> {
    use std::io::Read;

    let mut raw = Vec::new();
    flate2::read::GzDecoder::new(bytes).read_to_end(&mut raw)?;
    Profile::decode(raw.as_slice()).map_err(|e| CaptureError::Encode(e.to_string()))
}
