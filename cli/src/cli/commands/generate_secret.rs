use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;

pub fn run() {
    let mut bytes = [0u8; 48];
    rand::rng().fill(&mut bytes);
    let secret = URL_SAFE_NO_PAD.encode(bytes);

    println!("{}", secret);
    eprintln!();
    eprintln!("Set it as SECRET_KEY or [session] secret_key in moodleware.toml.");
}
