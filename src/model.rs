//! The full encoder-decoder model.

use anyhow::{ensure, Result};
use ndarray::{s, Array1, Array2, Array3};
use rand::rngs::StdRng;

use crate::bias::{causal_bias, padding_bias, padding_mask};
use crate::cache::DecoderState;
use crate::config::TransformerConfig;
use crate::decoder::Decoder;
use crate::dropout::{Dropout, Mode};
use crate::embeddings::EmbeddingTable;
use crate::encoder::Encoder;
use crate::init::zeros_bias;
use crate::positional::encode_positions;

/// One teacher-forced batch: `target` feeds the decoder (right-shifted
/// internally), `labels` are the positions the logits are scored against.
pub struct TrainingBatch {
    pub source: Array2<u32>,
    pub target: Array2<u32>,
    pub labels: Array2<u32>,
}

pub struct Transformer {
    pub config: TransformerConfig,

    source_embedding: EmbeddingTable,
    target_embedding: EmbeddingTable,
    softmax_embedding: EmbeddingTable,
    embedding_bias: Array1<f32>,

    encoder: Encoder,
    decoder: Decoder,
    residual_dropout: Dropout,
}

impl Transformer {
    pub fn new(config: TransformerConfig, rng: &mut StdRng) -> Result<Self> {
        config.validate()?;

        let source_embedding =
            EmbeddingTable::init(config.source_vocab_size, config.hidden_size, rng)?;
        let target_embedding = if config.shared_source_target_embedding {
            source_embedding.alias()
        } else {
            EmbeddingTable::init(config.target_vocab_size, config.hidden_size, rng)?
        };
        let softmax_embedding = if config.shared_embedding_and_softmax_weights {
            target_embedding.alias()
        } else {
            EmbeddingTable::init(config.target_vocab_size, config.hidden_size, rng)?
        };

        let encoder = Encoder::init(&config, rng);
        let decoder = Decoder::init(&config, rng);

        log::info!(
            "transformer: hidden={} heads={} layers={}+{} vocab={}/{}",
            config.hidden_size,
            config.num_heads,
            config.num_encoder_layers,
            config.num_decoder_layers,
            config.source_vocab_size,
            config.target_vocab_size
        );

        Ok(Self {
            embedding_bias: zeros_bias(config.hidden_size),
            residual_dropout: Dropout::new(config.residual_dropout),
            source_embedding,
            target_embedding,
            softmax_embedding,
            encoder,
            decoder,
            config,
        })
    }

    pub fn source_embedding(&self) -> &EmbeddingTable {
        &self.source_embedding
    }

    pub fn target_embedding(&self) -> &EmbeddingTable {
        &self.target_embedding
    }

    pub fn softmax_embedding(&self) -> &EmbeddingTable {
        &self.softmax_embedding
    }

    /// Fresh per-sequence decoding state with one empty cache per decoder
    /// layer.
    pub fn empty_state(&self, batch_size: usize) -> DecoderState {
        DecoderState::new(
            self.config.num_decoder_layers,
            batch_size,
            self.config.hidden_size,
        )
    }

    /// Runs the encoder over `source` and stores its output and the source
    /// padding bias in `state` for every subsequent `decode` call.
    pub fn encode(
        &self,
        source: &Array2<u32>,
        state: &mut DecoderState,
        mode: &mut Mode,
    ) -> Result<()> {
        let (batch, src_len) = source.dim();
        ensure!(src_len > 0, "empty source sequence");
        ensure!(
            batch == state.batch_size(),
            "source batch {} does not match state batch {}",
            batch,
            state.batch_size()
        );

        let mask = padding_mask(source, self.config.pad_id);
        let bias = padding_bias(&mask);

        let scale = (self.config.hidden_size as f32).sqrt();
        let mut input = self.source_embedding.lookup(&source.view())? * scale;
        input += &self.embedding_bias;
        encode_positions(&mut input);
        let input = self.residual_dropout.forward(input, mode);

        let output = self.encoder.forward(input, &bias, mode)?;
        log::debug!("encoded source: {:?}", output.shape());

        state.set_encoder_output(output, bias);
        Ok(())
    }

    /// Produces vocabulary logits for the teacher-forced prefix `targets`.
    ///
    /// The decoder input is `targets` right-shifted by one position, so the
    /// logits at position `i` predict `targets[i]` from the strict prefix.
    /// In `Mode::Train` all positions are computed at once and `state`
    /// caches stay untouched. In `Mode::Infer` only the newest position is
    /// computed against the grown caches; `targets` must extend the prefix
    /// of the previous call by exactly one token, and the returned array
    /// holds that single position.
    pub fn decode(
        &self,
        targets: &Array2<u32>,
        state: &mut DecoderState,
        mode: &mut Mode,
    ) -> Result<Array3<f32>> {
        let (batch, full_len) = targets.dim();
        ensure!(full_len > 0, "empty target sequence");
        ensure!(
            batch == state.batch_size(),
            "target batch {} does not match state batch {}",
            batch,
            state.batch_size()
        );

        let causal = causal_bias(full_len);

        // Right shift: position 0 reads a zero vector, position i reads
        // the embedding of targets[i - 1].
        let scale = (self.config.hidden_size as f32).sqrt();
        let embedded = self.target_embedding.lookup(&targets.view())? * scale;
        let mut shifted = Array3::zeros(embedded.dim());
        shifted
            .slice_mut(s![.., 1.., ..])
            .assign(&embedded.slice(s![.., ..full_len - 1, ..]));
        encode_positions(&mut shifted);

        let incremental = !mode.is_train();
        log::debug!(
            "decode: batch={} len={} incremental={} cached_steps={}",
            batch,
            full_len,
            incremental,
            state.step_count()
        );
        let (input, self_bias) = if incremental {
            ensure!(
                state.step_count() == full_len - 1,
                "incremental decode expects a prefix of {} cached steps, state has {}",
                full_len - 1,
                state.step_count()
            );
            let input = shifted.slice(s![.., full_len - 1.., ..]).to_owned();
            let self_bias = causal
                .slice(s![.., .., full_len - 1..full_len, ..])
                .to_owned();
            (input, self_bias)
        } else {
            (shifted, causal)
        };

        let input = self.residual_dropout.forward(input, mode);

        let (encoder_output, encoder_bias, caches) = state.decode_parts_mut()?;
        let hidden = self.decoder.forward(
            input,
            &self_bias,
            encoder_bias,
            encoder_output,
            incremental.then_some(caches),
            mode,
        )?;

        let (batch, out_len, hidden_size) = hidden.dim();
        let flat = hidden.into_shape_with_order((batch * out_len, hidden_size))?;
        let logits = self.softmax_embedding.project(&flat.view());
        let vocab = logits.dim().1;
        Ok(logits.into_shape_with_order((batch, out_len, vocab))?)
    }

    /// Teacher-forced training entry point: encode, then decode the whole
    /// target at once. Inference drives `encode`/`decode` directly instead.
    pub fn forward(&self, batch: &TrainingBatch, mode: &mut Mode) -> Result<Array3<f32>> {
        ensure!(
            mode.is_train(),
            "forward is the teacher-forced training entry point; drive encode/decode for inference"
        );
        ensure!(
            batch.target.dim() == batch.labels.dim(),
            "target shape {:?} does not match label shape {:?}",
            batch.target.dim(),
            batch.labels.dim()
        );

        let mut state = self.empty_state(batch.source.dim().0);
        self.encode(&batch.source, &mut state, mode)?;
        self.decode(&batch.target, &mut state, mode)
    }

    /// Label-smoothed cross entropy averaged over non-padding label
    /// positions.
    pub fn loss(&self, batch: &TrainingBatch, mode: &mut Mode) -> Result<f32> {
        let logits = self.forward(batch, mode)?;
        let (batches, len, vocab) = logits.dim();

        let on = 1.0 - self.config.label_smoothing;
        let off = self.config.label_smoothing / (vocab - 1) as f32;
        // Entropy of the smoothed target distribution, subtracted so a
        // perfect prediction gives a loss of zero.
        let normalizing =
            -(on * on.ln() + (vocab - 1) as f32 * off * (off + 1e-20).ln());

        let mut total = 0.0;
        let mut count = 0usize;
        for b in 0..batches {
            for pos in 0..len {
                let label = batch.labels[[b, pos]];
                if label == self.config.pad_id {
                    continue;
                }
                ensure!(
                    (label as usize) < vocab,
                    "label id {} out of range for vocabulary of size {}",
                    label,
                    vocab
                );

                let row = logits.slice(s![b, pos, ..]);
                let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let log_sum = row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln() + max;

                let mut ce = 0.0;
                for (j, &x) in row.iter().enumerate() {
                    let q = if j == label as usize { on } else { off };
                    ce -= q * (x - log_sum);
                }
                total += ce - normalizing;
                count += 1;
            }
        }
        ensure!(count > 0, "batch has no non-padding label positions");
        Ok(total / count as f32)
    }
}
