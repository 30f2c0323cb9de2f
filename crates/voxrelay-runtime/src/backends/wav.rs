//! WAV helpers for backends that exchange encoded audio.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

/// Length in seconds of a WAV stream, read from its header.
pub fn wav_duration(bytes: &[u8]) -> Result<f64, hound::Error> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(hound::Error::FormatError("zero sample rate"));
    }
    Ok(f64::from(reader.duration()) / f64::from(spec.sample_rate))
}

/// Encode mono 16-bit PCM samples as a WAV stream.
pub fn encode_pcm16(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
