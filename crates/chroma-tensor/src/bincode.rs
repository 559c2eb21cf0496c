use crate::Tensor;

impl<T, const N: usize> ::bincode::enc::Encode for Tensor<T, N>
where
    T: ::bincode::enc::Encode,
{
    fn encode<E: ::bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> Result<(), ::bincode::error::EncodeError> {
        ::bincode::Encode::encode(&self.shape, encoder)?;
        ::bincode::Encode::encode(&self.storage, encoder)?;
        Ok(())
    }
}

impl<T, const N: usize, C> ::bincode::de::Decode<C> for Tensor<T, N>
where
    T: ::bincode::de::Decode<C>,
{
    fn decode<D: ::bincode::de::Decoder<Context = C>>(
        decoder: &mut D,
    ) -> Result<Self, ::bincode::error::DecodeError> {
        let shape: [usize; N] = ::bincode::Decode::decode(decoder)?;
        let data: Vec<T> = ::bincode::Decode::decode(decoder)?;
        Tensor::from_shape_vec(shape, data).map_err(|e| {
            ::bincode::error::DecodeError::OtherString(format!("Tensor error: {}", e))
        })
    }
}

impl<'de, T, const N: usize, C> ::bincode::de::BorrowDecode<'de, C> for Tensor<T, N>
where
    T: ::bincode::de::BorrowDecode<'de, C>,
{
    fn borrow_decode<D: ::bincode::de::BorrowDecoder<'de, Context = C>>(
        decoder: &mut D,
    ) -> Result<Self, ::bincode::error::DecodeError> {
        let shape: [usize; N] = ::bincode::BorrowDecode::borrow_decode(decoder)?;
        let data: Vec<T> = ::bincode::BorrowDecode::borrow_decode(decoder)?;
        Tensor::from_shape_vec(shape, data).map_err(|e| {
            ::bincode::error::DecodeError::OtherString(format!("Tensor error: {}", e))
        })
    }
}
