pub mod cli_tools;
