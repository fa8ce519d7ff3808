//! RECAP Terminal: the interactive variant.
//!
//! Listens on the microphone (or reads the keyboard), answers on stdout, and speaks replies
//! on the default output device. Slash commands typed at any time change modes; see
//! [`console`].

mod console;

use console::{spawn_stdin_reader, TerminalConsole, HELP};
use recap_core::{
    bootstrap, ConversationLoop, InputSource, LoopExit, RecapConfig, Resources, SessionState,
};
use recap_voice::{AudioCapture, AudioPlayer, DevicePlayer, Listener, MicrophoneListener, VoiceRecorder};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[recap-terminal] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match RecapConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("❌ configuration: {}", e);
            std::process::exit(1);
        }
    };
    let resources = match Resources::load(&config) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let audio = config.audio_config();
    let wants_mic = config.session.input_source == InputSource::Microphone;
    let mic_available = wants_mic && AudioCapture::has_input_device(&audio);
    if wants_mic && !mic_available {
        tracing::warn!(target: "recap::voice", "no microphone found, using text input");
    }

    let player: Option<Arc<dyn AudioPlayer>> = match DevicePlayer::open() {
        Ok(p) => Some(Arc::new(p)),
        Err(e) => {
            tracing::warn!(target: "recap::voice", "no output device, speech disabled: {}", e);
            None
        }
    };

    let stt = match bootstrap::build_stt(&config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("❌ speech recognition: {}", e);
            std::process::exit(1);
        }
    };
    let coordinator = match bootstrap::build_coordinator(&config, &resources, player.clone()).await {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!("❌ backends: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = bootstrap::warm_up(&config, &coordinator).await {
        tracing::error!("❌ {}", e);
        std::process::exit(1);
    }

    let (mut state, controller) = SessionState::new(
        wants_mic,
        config.session.tts_enabled && player.is_some(),
        mic_available,
        player,
    );
    let lines = match spawn_stdin_reader(controller) {
        Ok(rx) => rx,
        Err(e) => {
            tracing::error!("❌ cannot read stdin: {}", e);
            std::process::exit(1);
        }
    };
    let mut console = TerminalConsole::new(lines, std::io::stdout());
    let mut listener = MicrophoneListener::new(
        audio,
        VoiceRecorder::new(config.recorder.recorder_config()),
        stt,
        config.transcribe_options(),
    );

    let mut session = resources.new_session(&config.session.default_language);
    let conversation = ConversationLoop::new(coordinator.clone(), resources.voices.clone());

    println!("{}", HELP);
    let greeting_language = resources.voices.default_locale.clone();
    if let Err(e) = coordinator
        .announce(&config.session.greeting, &greeting_language, &mut state, &mut console)
        .await
    {
        tracing::warn!("greeting failed: {}", e);
    }

    let listener: Option<&mut dyn Listener> = if mic_available { Some(&mut listener) } else { None };
    tokio::select! {
        result = conversation.run(&mut session, &mut state, &mut console, listener) => {
            match result {
                Ok(LoopExit::Farewell) => tracing::info!("session complete"),
                Ok(LoopExit::InputClosed) => tracing::info!("input closed, exiting"),
                Err(e) => {
                    tracing::error!("session ended with error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("CTRL-C received; ending session");
            // An in-flight capture runs on a blocking thread; exit instead of waiting for it.
            std::process::exit(0);
        }
    }
}
