use clap::Parser;
use segmerge_engine::OutputFormat;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Encrypted HLS downloader",
    long_about = "Downloads AES-128 encrypted HLS playlists and merges them into a single file.\n\
                  \n\
                  Positional URLs form one download: they are tried in order until one\n\
                  succeeds. Use --jobs to run several downloads at once; downloads whose\n\
                  content turns out to be identical are kept only once, under the longer title."
)]
pub struct CliArgs {
    /// Playlist URL(s) for one download, tried in order
    #[arg(
        required_unless_present = "jobs",
        help = "Playlist URL(s) of a single download; later URLs are fallbacks"
    )]
    pub urls: Vec<String>,

    /// Title of the positional download
    #[arg(
        short,
        long,
        help = "Title used for the output folder and file (default: video)"
    )]
    pub title: Option<String>,

    /// Output directory
    #[arg(
        short,
        long,
        default_value = ".",
        help = "Directory in which the <title>/ folder is created"
    )]
    pub output_dir: PathBuf,

    /// JSON file with a list of downloads
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "JSON array of downloads: [{\"urls\": [...], \"title\": \"...\", \"output_dir\": \"...\"}]"
    )]
    pub jobs: Option<PathBuf>,

    /// Output container
    #[arg(
        short,
        long,
        value_enum,
        default_value_t = OutputFormat::Ts,
        help = "Container of the merged file; anything but ts is remuxed with ffmpeg"
    )]
    pub format: OutputFormat,

    /// Remux program
    #[arg(
        long,
        default_value = "ffmpeg",
        help = "Program used to remux into the requested container"
    )]
    pub ffmpeg: PathBuf,

    /// Keep segment files
    #[arg(
        long,
        help = "Keep raw and decrypted segment files after merging"
    )]
    pub keep_segments: bool,

    /// Download workers
    #[arg(
        long,
        help = "Concurrent segment downloads per playlist (default: number of CPU cores)"
    )]
    pub download_workers: Option<usize>,

    /// Decrypt workers
    #[arg(
        long,
        help = "Concurrent segment decryptions per playlist (default: half the CPU cores)"
    )]
    pub decrypt_workers: Option<usize>,

    /// Segment retry attempts
    #[arg(
        long,
        default_value = "5",
        help = "Retries for a failed segment download before the playlist fails"
    )]
    pub segment_retries: u32,

    /// Overall timeout in seconds
    #[arg(
        long,
        default_value = "120",
        help = "Overall timeout in seconds for HTTP requests (0 disables it)"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Read timeout in seconds
    #[arg(
        long,
        default_value = "30",
        help = "Read timeout in seconds (maximum time between receiving data chunks)"
    )]
    pub read_timeout: u64,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(
        long,
        help = "Proxy server URL for downloads (e.g., \"http://proxy.example.com:8080\")"
    )]
    pub proxy: Option<String>,

    /// Proxy type (http, https, socks5, all)
    #[arg(
        long,
        default_value = "all",
        help = "Proxy type (http, https, socks5, all)",
        value_parser = ["http", "https", "socks5", "all"]
    )]
    pub proxy_type: String,

    /// Proxy username
    #[arg(long, help = "Username for proxy authentication")]
    pub proxy_user: Option<String>,

    /// Proxy password
    #[arg(long, help = "Password for proxy authentication")]
    pub proxy_pass: Option<String>,

    /// Use system proxy settings
    #[arg(
        long,
        default_value = "true",
        help = "Use system proxy settings if available"
    )]
    pub use_system_proxy: bool,

    /// Disable all proxy settings for downloads
    #[arg(
        long,
        help = "Disable all proxy settings (including system proxy) for downloads"
    )]
    pub no_proxy: bool,

    /// Verify TLS certificates
    #[arg(
        long,
        help = "Verify server certificates (by default certificate errors are ignored)"
    )]
    pub strict_tls: bool,

    /// Custom HTTP headers for download requests
    #[arg(
        long = "header",
        short = 'H',
        help = "Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Show progress bars
    #[arg(
        short = 'P',
        long = "progress",
        help = "Show a progress bar per download"
    )]
    pub show_progress: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,
}
