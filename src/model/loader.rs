//! Binary model-file loading.
//!
//! Model files are a little-endian sequential format:
//!
//! ```text
//! magic (u32) | 7 x i32 hyperparameters | vocabulary | tensor records
//! ```
//!
//! The vocabulary is a count followed by length-prefixed byte strings.
//! Each tensor record carries its dimension count, name length, storage
//! type tag, dimensions (innermost first), name bytes, and the packed
//! payload. Records repeat until end of file.
//!
//! Every record is validated against the architecture-defined tensor
//! table before its payload is accepted: unknown names, wrong shapes,
//! and short payloads all fail the load. Payload bytes land in a single
//! arena whose capacity is reserved up front from the hyperparameters,
//! after the header has been validated.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::ops::Range;
use std::path::Path;

use candle_core::{Device, Tensor};
use log::{debug, info};

use crate::error::{Error, Result};
use crate::model::quant::WeightType;
use crate::vocab::Vocabulary;

/// File magic, the ASCII bytes "lmgg" read as a little-endian u32.
pub const MODEL_MAGIC: u32 = 0x6767_6d6c;

/// Per-tensor bookkeeping overhead assumed by the weight budget.
const TENSOR_OVERHEAD: usize = 256;

/// Model hyperparameters, read from the file header.
#[derive(Debug, Clone)]
pub struct Hyperparams {
    /// Vocabulary size.
    pub n_vocab: usize,
    /// Context window length in tokens.
    pub n_ctx: usize,
    /// Embedding (hidden) dimension.
    pub n_embd: usize,
    /// Number of attention heads.
    pub n_head: usize,
    /// Number of transformer layers.
    pub n_layer: usize,
    /// Rotary dimensions per head.
    pub n_rot: usize,
    /// Storage format of the 2D weight tensors.
    pub wtype: WeightType,
}

impl Hyperparams {
    /// Dimension per attention head.
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Feed-forward inner dimension.
    pub fn n_ff(&self) -> usize {
        4 * self.n_embd
    }

    fn read(r: &mut impl Read) -> Result<Self> {
        let n_vocab = read_dim(r, "n_vocab")?;
        let n_ctx = read_dim(r, "n_ctx")?;
        let n_embd = read_dim(r, "n_embd")?;
        let n_head = read_dim(r, "n_head")?;
        let n_layer = read_dim(r, "n_layer")?;
        let n_rot = read_dim(r, "n_rot")?;
        let ftype = read_i32(r)?;
        let wtype = WeightType::from_ftype(ftype)?;

        if n_embd % n_head != 0 {
            return Err(Error::InvalidHyperparameter {
                name: "n_head",
                value: n_head as i64,
            });
        }
        let head_dim = n_embd / n_head;
        if n_rot % 2 != 0 || n_rot > head_dim {
            return Err(Error::InvalidHyperparameter {
                name: "n_rot",
                value: n_rot as i64,
            });
        }

        Ok(Self {
            n_vocab,
            n_ctx,
            n_embd,
            n_head,
            n_layer,
            n_rot,
            wtype,
        })
    }
}

/// The architecture-defined tensor table: name and shape (innermost
/// dimension first, matching the file encoding).
fn tensor_table(h: &Hyperparams) -> Vec<(String, Vec<usize>)> {
    let (n_vocab, n_embd, n_ff) = (h.n_vocab, h.n_embd, h.n_ff());
    let mut table = vec![
        ("transformer.wte.weight".into(), vec![n_embd, n_vocab]),
        ("transformer.ln_f.weight".into(), vec![n_embd]),
        ("transformer.ln_f.bias".into(), vec![n_embd]),
        ("lm_head.weight".into(), vec![n_embd, n_vocab]),
        ("lm_head.bias".into(), vec![n_vocab]),
    ];
    for i in 0..h.n_layer {
        let p = format!("transformer.h.{i}");
        table.push((format!("{p}.ln_1.weight"), vec![n_embd]));
        table.push((format!("{p}.ln_1.bias"), vec![n_embd]));
        table.push((format!("{p}.attn.q_proj.weight"), vec![n_embd, n_embd]));
        table.push((format!("{p}.attn.k_proj.weight"), vec![n_embd, n_embd]));
        table.push((format!("{p}.attn.v_proj.weight"), vec![n_embd, n_embd]));
        table.push((format!("{p}.attn.out_proj.weight"), vec![n_embd, n_embd]));
        table.push((format!("{p}.mlp.fc_in.weight"), vec![n_embd, n_ff]));
        table.push((format!("{p}.mlp.fc_in.bias"), vec![n_ff]));
        table.push((format!("{p}.mlp.fc_out.weight"), vec![n_ff, n_embd]));
        table.push((format!("{p}.mlp.fc_out.bias"), vec![n_embd]));
    }
    table
}

/// Arena byte budget for all weight payloads: 2D tensors at the file's
/// storage format, 1D tensors at f32, plus per-tensor overhead.
fn weight_budget(h: &Hyperparams, table: &[(String, Vec<usize>)]) -> usize {
    let mut bytes = 0;
    for (_, shape) in table {
        let n: usize = shape.iter().product();
        bytes += if shape.len() == 2 {
            h.wtype.packed_bytes(n).unwrap_or(n * 4)
        } else {
            n * 4
        };
        bytes += TENSOR_OVERHEAD;
    }
    bytes
}

#[derive(Debug)]
struct Slot {
    shape: Vec<usize>,
    data: Option<(WeightType, Range<usize>)>,
}

/// Weight payloads parked in one arena, keyed by tensor name until they
/// are resolved into backend tensors.
#[derive(Debug)]
pub struct WeightRegistry {
    arena: Vec<u8>,
    slots: HashMap<String, Slot>,
}

impl WeightRegistry {
    fn for_model(h: &Hyperparams) -> Result<Self> {
        let table = tensor_table(h);
        let budget = weight_budget(h, &table);
        debug!("reserving {budget} bytes for weights");

        let mut arena = Vec::new();
        arena
            .try_reserve_exact(budget)
            .map_err(|_| Error::OutOfMemory {
                what: "model weights",
                bytes: budget,
            })?;

        let slots = table
            .into_iter()
            .map(|(name, shape)| (name, Slot { shape, data: None }))
            .collect();

        Ok(Self { arena, slots })
    }

    /// Reads one record's payload into the arena after validating the
    /// record against the slot table. Returns the payload size.
    fn store(
        &mut self,
        r: &mut impl Read,
        name: String,
        shape: &[usize],
        wtype: WeightType,
    ) -> Result<usize> {
        let slot = match self.slots.get_mut(&name) {
            Some(slot) => slot,
            None => return Err(Error::UnknownTensor(name)),
        };
        if slot.shape != shape {
            return Err(Error::ShapeMismatch {
                name,
                expected: slot.shape.clone(),
                found: shape.to_vec(),
            });
        }

        let n_elements: usize = shape.iter().product();
        let nbytes = match wtype.packed_bytes(n_elements) {
            Some(nbytes) => nbytes,
            // element count is not a whole number of blocks
            None => {
                let whole = n_elements / wtype.block_size() * wtype.unit_bytes();
                return Err(Error::SizeMismatch {
                    name,
                    expected: whole + wtype.unit_bytes(),
                    found: whole,
                });
            }
        };

        let start = self.arena.len();
        self.arena.resize(start + nbytes, 0);
        let mut filled = 0;
        while filled < nbytes {
            let got = r.read(&mut self.arena[start + filled..])?;
            if got == 0 {
                return Err(Error::SizeMismatch {
                    name,
                    expected: nbytes,
                    found: filled,
                });
            }
            filled += got;
        }

        slot.data = Some((wtype, start..start + nbytes));
        Ok(nbytes)
    }

    fn ensure_complete(&self) -> Result<()> {
        for (name, slot) in &self.slots {
            if slot.data.is_none() {
                return Err(Error::MissingTensor(name.clone()));
            }
        }
        Ok(())
    }

    /// Removes a tensor from the registry, dequantizing its payload to
    /// an f32 tensor on `device`. 2D tensors come out with shape
    /// `(outer, inner)` relative to the file dimension order.
    pub fn take(&mut self, name: &str, device: &Device) -> Result<Tensor> {
        let slot = self
            .slots
            .remove(name)
            .ok_or_else(|| Error::MissingTensor(name.to_string()))?;
        let (wtype, range) = slot
            .data
            .ok_or_else(|| Error::MissingTensor(name.to_string()))?;

        let n_elements: usize = slot.shape.iter().product();
        let values = wtype.dequantize(&self.arena[range], n_elements);

        let tensor = match slot.shape.len() {
            1 => Tensor::from_vec(values, slot.shape[0], device)?,
            _ => Tensor::from_vec(values, (slot.shape[1], slot.shape[0]), device)?,
        };
        Ok(tensor)
    }
}

/// A fully parsed model file: hyperparameters, vocabulary, and raw
/// weights awaiting resolution into backend tensors.
#[derive(Debug)]
pub struct ModelFile {
    pub hparams: Hyperparams,
    pub vocab: Vocabulary,
    pub weights: WeightRegistry,
}

impl ModelFile {
    /// Parses a model file from disk.
    ///
    /// The magic number and header are validated before any weight
    /// memory is reserved.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut r = BufReader::new(file);

        let magic = read_u32(&mut r)?;
        if magic != MODEL_MAGIC {
            return Err(Error::InvalidMagic {
                magic,
                path: path.display().to_string(),
            });
        }

        let hparams = Hyperparams::read(&mut r)?;
        info!(
            "model: n_vocab={} n_ctx={} n_embd={} n_head={} n_layer={} n_rot={} wtype={:?}",
            hparams.n_vocab,
            hparams.n_ctx,
            hparams.n_embd,
            hparams.n_head,
            hparams.n_layer,
            hparams.n_rot,
            hparams.wtype,
        );

        let vocab = read_vocab(&mut r, hparams.n_vocab)?;
        let mut weights = WeightRegistry::for_model(&hparams)?;

        let mut n_tensors = 0usize;
        let mut total_bytes = 0usize;
        while !at_eof(&mut r)? {
            let (name, shape, wtype) = read_record_header(&mut r)?;
            debug!("tensor {name} {shape:?} {wtype:?}");
            total_bytes += weights.store(&mut r, name, &shape, wtype)?;
            n_tensors += 1;
        }
        weights.ensure_complete()?;

        info!(
            "loaded {} tensors ({} bytes) from {}",
            n_tensors,
            total_bytes,
            path.display()
        );

        Ok(Self {
            hparams,
            vocab,
            weights,
        })
    }
}

fn read_record_header(r: &mut impl Read) -> Result<(String, Vec<usize>, WeightType)> {
    let n_dims = read_i32(r)?;
    if !(1..=2).contains(&n_dims) {
        return Err(Error::InvalidHyperparameter {
            name: "n_dims",
            value: n_dims as i64,
        });
    }
    let name_len = read_i32(r)?;
    if !(1..=1024).contains(&name_len) {
        return Err(Error::InvalidHyperparameter {
            name: "name_len",
            value: name_len as i64,
        });
    }
    let tag = read_i32(r)?;
    let wtype = WeightType::from_record_tag(tag)?;

    let mut shape = Vec::with_capacity(n_dims as usize);
    for _ in 0..n_dims {
        shape.push(read_dim(r, "tensor dimension")?);
    }
    let name = read_string(r, name_len as usize)?;

    Ok((name, shape, wtype))
}

fn read_vocab(r: &mut impl Read, n_vocab: usize) -> Result<Vocabulary> {
    let count = read_i32(r)?;
    if count < 0 || count as usize != n_vocab {
        return Err(Error::VocabSizeMismatch {
            expected: n_vocab,
            found: count.max(0) as usize,
        });
    }

    let mut entries = Vec::with_capacity(n_vocab);
    for _ in 0..n_vocab {
        let len = read_u32(r)? as usize;
        if len > 1 << 20 {
            return Err(Error::InvalidHyperparameter {
                name: "token length",
                value: len as i64,
            });
        }
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes)?;
        entries.push(bytes);
    }
    Ok(Vocabulary::from_entries(entries))
}

fn at_eof(r: &mut impl BufRead) -> Result<bool> {
    Ok(r.fill_buf()?.is_empty())
}

fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i32(r: &mut impl Read) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Reads an i32 that must be a positive dimension.
fn read_dim(r: &mut impl Read, name: &'static str) -> Result<usize> {
    let value = read_i32(r)?;
    if value <= 0 {
        return Err(Error::InvalidHyperparameter {
            name,
            value: value as i64,
        });
    }
    Ok(value as usize)
}

fn read_string(r: &mut impl Read, len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
