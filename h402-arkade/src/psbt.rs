//! Reading Ark transactions out of PSBTs.
//!
//! Only the parts of BIP-174 that verification needs are decoded: the global
//! unsigned transaction and, per input, whether a taproot key-path or
//! script-path signature is present. Every other record is skipped.

const MAGIC: &[u8; 5] = b"psbt\xff";

const GLOBAL_UNSIGNED_TX: u8 = 0x00;
const IN_TAP_KEY_SIG: u8 = 0x13;
const IN_TAP_SCRIPT_SIG: u8 = 0x14;

/// Errors while decoding a PSBT.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PsbtError {
    /// The data does not start with `psbt\xff`.
    #[error("missing PSBT magic bytes")]
    Magic,
    /// The data ended in the middle of a record.
    #[error("unexpected end of PSBT data")]
    UnexpectedEof,
    /// The global map has no unsigned transaction.
    #[error("PSBT has no unsigned transaction")]
    MissingUnsignedTx,
    /// The unsigned transaction could not be parsed.
    #[error("malformed unsigned transaction: {0}")]
    Transaction(&'static str),
    /// Fewer input maps than transaction inputs.
    #[error("PSBT has {maps} input maps for {inputs} inputs")]
    InputCount {
        /// Input maps found.
        maps: usize,
        /// Inputs in the unsigned transaction.
        inputs: usize,
    },
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    /// Amount in satoshis.
    pub value: u64,
    /// Locking script.
    pub script_pubkey: Vec<u8>,
}

/// A transaction input reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    /// Previous transaction id, in serialization byte order.
    pub previous_txid: [u8; 32],
    /// Previous output index.
    pub previous_vout: u32,
    /// Sequence number.
    pub sequence: u32,
}

/// The unsigned transaction carried in the global map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
    /// Transaction version.
    pub version: i32,
    /// Inputs.
    pub inputs: Vec<TxIn>,
    /// Outputs.
    pub outputs: Vec<TxOut>,
    /// Lock time.
    pub lock_time: u32,
}

/// Signature records present on one PSBT input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSignatures {
    /// A taproot key-path signature is present.
    pub tap_key_sig: bool,
    /// Number of taproot script-path signatures.
    pub tap_script_sigs: usize,
}

impl InputSignatures {
    /// Whether the input carries any taproot signature.
    #[must_use]
    pub const fn is_signed(&self) -> bool {
        self.tap_key_sig || self.tap_script_sigs > 0
    }
}

/// A decoded PSBT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Psbt {
    /// The transaction being signed.
    pub unsigned_tx: UnsignedTx,
    /// Signature records, one per input.
    pub inputs: Vec<InputSignatures>,
}

impl Psbt {
    /// Decodes binary PSBT data.
    ///
    /// # Errors
    ///
    /// Returns [`PsbtError`] if the data is not a well-formed PSBT.
    pub fn decode(bytes: &[u8]) -> Result<Self, PsbtError> {
        let mut reader = Reader::new(bytes);
        if reader.take(MAGIC.len())? != MAGIC {
            return Err(PsbtError::Magic);
        }

        let mut unsigned_tx = None;
        while let Some((key, value)) = reader.record()? {
            if key.first() == Some(&GLOBAL_UNSIGNED_TX) {
                unsigned_tx = Some(parse_tx(value)?);
            }
        }
        let unsigned_tx = unsigned_tx.ok_or(PsbtError::MissingUnsignedTx)?;

        let mut inputs = Vec::with_capacity(unsigned_tx.inputs.len());
        for _ in 0..unsigned_tx.inputs.len() {
            if reader.is_empty() {
                return Err(PsbtError::InputCount {
                    maps: inputs.len(),
                    inputs: unsigned_tx.inputs.len(),
                });
            }
            let mut signatures = InputSignatures::default();
            while let Some((key, _)) = reader.record()? {
                match key.first() {
                    Some(&IN_TAP_KEY_SIG) => signatures.tap_key_sig = true,
                    Some(&IN_TAP_SCRIPT_SIG) => signatures.tap_script_sigs += 1,
                    _ => {}
                }
            }
            inputs.push(signatures);
        }

        Ok(Self {
            unsigned_tx,
            inputs,
        })
    }

    /// Indexes of inputs with no taproot signature.
    #[must_use]
    pub fn unsigned_inputs(&self) -> Vec<usize> {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| !input.is_signed())
            .map(|(index, _)| index)
            .collect()
    }
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PsbtError> {
        if self.data.len() < n {
            return Err(PsbtError::UnexpectedEof);
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], PsbtError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, PsbtError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, PsbtError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, PsbtError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn compact_size(&mut self) -> Result<u64, PsbtError> {
        match self.u8()? {
            0xfd => Ok(u64::from(u16::from_le_bytes(self.array()?))),
            0xfe => Ok(u64::from(self.u32()?)),
            0xff => self.u64(),
            n => Ok(u64::from(n)),
        }
    }

    fn length(&mut self) -> Result<usize, PsbtError> {
        let n = self.compact_size()?;
        usize::try_from(n)
            .ok()
            .filter(|n| *n <= self.data.len())
            .ok_or(PsbtError::UnexpectedEof)
    }

    fn bytes(&mut self) -> Result<&'a [u8], PsbtError> {
        let n = self.length()?;
        self.take(n)
    }

    /// Reads one key-value record, or `None` at the end-of-map separator.
    fn record(&mut self) -> Result<Option<(&'a [u8], &'a [u8])>, PsbtError> {
        let key = self.bytes()?;
        if key.is_empty() {
            return Ok(None);
        }
        let value = self.bytes()?;
        Ok(Some((key, value)))
    }
}

fn parse_tx(bytes: &[u8]) -> Result<UnsignedTx, PsbtError> {
    let mut reader = Reader::new(bytes);
    let version = i32::from_le_bytes(reader.array()?);

    let input_count = reader.length()?;
    if input_count == 0 {
        return Err(PsbtError::Transaction("no inputs or witness serialization"));
    }
    let mut inputs = Vec::with_capacity(input_count);
    for _ in 0..input_count {
        let previous_txid = reader.array()?;
        let previous_vout = reader.u32()?;
        if !reader.bytes()?.is_empty() {
            return Err(PsbtError::Transaction("input has a scriptSig"));
        }
        let sequence = reader.u32()?;
        inputs.push(TxIn {
            previous_txid,
            previous_vout,
            sequence,
        });
    }

    let output_count = reader.length()?;
    let mut outputs = Vec::with_capacity(output_count);
    for _ in 0..output_count {
        let value = reader.u64()?;
        let script_pubkey = reader.bytes()?.to_vec();
        outputs.push(TxOut {
            value,
            script_pubkey,
        });
    }

    let lock_time = reader.u32()?;
    if !reader.is_empty() {
        return Err(PsbtError::Transaction("trailing bytes"));
    }
    Ok(UnsignedTx {
        version,
        inputs,
        outputs,
        lock_time,
    })
}
