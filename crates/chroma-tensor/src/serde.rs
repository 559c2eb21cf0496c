use crate::Tensor;

use ::serde::ser::SerializeStruct;
use ::serde::Deserialize;

impl<T, const N: usize> ::serde::Serialize for Tensor<T, N>
where
    T: ::serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ::serde::Serializer,
    {
        let mut state = serializer.serialize_struct("Tensor", 2)?;
        state.serialize_field("data", self.as_slice())?;
        state.serialize_field("shape", &self.shape.to_vec())?;
        state.end()
    }
}

impl<'de, T, const N: usize> ::serde::Deserialize<'de> for Tensor<T, N>
where
    T: ::serde::Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: ::serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct TensorData<T> {
            data: Vec<T>,
            shape: Vec<usize>,
        }

        let TensorData { data, shape } = TensorData::deserialize(deserializer)?;

        let shape_array: [usize; N] = shape
            .try_into()
            .map_err(|_| ::serde::de::Error::custom("Invalid shape"))?;

        Tensor::from_shape_vec(shape_array, data).map_err(::serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use crate::Tensor;

    #[test]
    fn test_serde() -> Result<(), Box<dyn std::error::Error>> {
        let data = vec![1, 2, 3, 4, 5, 6];
        let tensor = Tensor::<u8, 2>::from_shape_vec([2, 3], data)?;
        let serialized = serde_json::to_string(&tensor)?;
        let deserialized: Tensor<u8, 2> = serde_json::from_str(&serialized)?;
        assert_eq!(tensor.as_slice(), deserialized.as_slice());
        assert_eq!(deserialized.shape, [2, 3]);
        Ok(())
    }

    #[test]
    fn test_serde_bad_shape() {
        let json = r#"{"data":[1,2,3],"shape":[2,2]}"#;
        let res: Result<Tensor<u8, 2>, _> = serde_json::from_str(json);
        assert!(res.is_err());
    }
}
