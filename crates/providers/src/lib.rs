pub mod traits;

pub use traits::{
    ChatRequest, Denoise, Eou, FirstByteCallback, Llm, RealtimeModel, RealtimeToolCall,
    SttCallback, SttEvent, SttEventKind, Stt, Tts, Vad, VadCallback, VadEvent, VadEventKind,
};
