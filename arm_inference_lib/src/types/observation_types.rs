use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// Key under which actuator positions are sent to the policy.
pub const STATE_KEY: &str = "observation.state";

/// Element type of a [`Tensor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float32,
    Uint8,
}

/// Element storage of a [`Tensor`]. Serialized as a plain JSON array, so
/// bytes go over the wire as integers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TensorData {
    Float32(Vec<f32>),
    Uint8(Vec<u8>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Float32(_) => DType::Float32,
            TensorData::Uint8(_) => DType::Uint8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Float32(values) => values.len(),
            TensorData::Uint8(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            TensorData::Float32(values) => Some(values),
            TensorData::Uint8(_) => None,
        }
    }
}

/// A named array with explicit shape and element type.
///
/// `data` is row-major; its length must equal the product of `shape`.
/// On the wire: `{"dtype": .., "shape": [..], "data": [..]}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireTensor")]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: TensorData,
}

impl Tensor {
    pub fn float32(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            shape,
            data: TensorData::Float32(data),
        }
    }

    pub fn vector(data: Vec<f32>) -> Self {
        Self::float32(vec![data.len()], data)
    }

    /// Image-style tensor (height, width, channels) from raw bytes.
    pub fn uint8(shape: Vec<usize>, bytes: Vec<u8>) -> Self {
        Self {
            shape,
            data: TensorData::Uint8(bytes),
        }
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Product of `shape`, or `None` if it does not fit in `usize`.
    pub fn element_count(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// Checks shape/data agreement and that float32 values are finite.
    pub fn validate(&self) -> Result<(), String> {
        let expected = self
            .element_count()
            .ok_or_else(|| format!("shape {:?} overflows the element count", self.shape))?;
        if expected != self.data.len() {
            return Err(format!(
                "shape {:?} implies {} elements but data has {}",
                self.shape,
                expected,
                self.data.len()
            ));
        }

        if let TensorData::Float32(values) = &self.data {
            if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
                return Err(format!("non-finite float32 value at index {}", pos));
            }
        }

        Ok(())
    }
}

impl Serialize for Tensor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Tensor", 3)?;
        state.serialize_field("dtype", &self.dtype())?;
        state.serialize_field("shape", &self.shape)?;
        state.serialize_field("data", &self.data)?;
        state.end()
    }
}

#[derive(Deserialize)]
struct WireTensor {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl TryFrom<WireTensor> for Tensor {
    type Error = String;

    fn try_from(wire: WireTensor) -> Result<Self, Self::Error> {
        let data = match wire.dtype {
            DType::Float32 => TensorData::Float32(wire.data.iter().map(|&v| v as f32).collect()),
            DType::Uint8 => {
                let mut bytes = Vec::with_capacity(wire.data.len());
                for (pos, &v) in wire.data.iter().enumerate() {
                    if v.fract() != 0.0 || !(0.0..=255.0).contains(&v) {
                        return Err(format!("value {} at index {} is not a uint8", v, pos));
                    }
                    bytes.push(v as u8);
                }
                TensorData::Uint8(bytes)
            }
        };
        Ok(Self {
            shape: wire.shape,
            data,
        })
    }
}

/// One control cycle's sensor snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub tensors: BTreeMap<String, Tensor>,
    pub task: Option<String>,
}

impl Observation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn with_task(mut self, task: Option<String>) -> Self {
        self.task = task;
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }
}

/// Ordered per-actuator command values returned by the policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub values: Vec<f32>,
}

impl Action {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Accepts `[n]` or `[1, n]` float32 tensors; the batch dimension is
    /// squeezed away.
    pub fn from_tensor(tensor: Tensor, expected_dim: Option<usize>) -> Result<Self, String> {
        let width = match tensor.shape.as_slice() {
            [n] | [1, n] => *n,
            other => return Err(format!("action shape {:?} is not [n] or [1, n]", other)),
        };
        tensor.validate()?;

        if let Some(expected) = expected_dim {
            if width != expected {
                return Err(format!(
                    "action has {} values, expected {}",
                    width, expected
                ));
            }
        }

        match tensor.data {
            TensorData::Float32(values) => Ok(Self { values }),
            TensorData::Uint8(_) => Err("action dtype must be float32, got uint8".to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
