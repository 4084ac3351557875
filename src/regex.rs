use regex::Regex;
use std::sync::LazyLock;

/// Regex consolidada seguindo o padrão (?isx)
/// i: case-insensitive
/// s: '.' inclui \n (embora nomes de arquivos raramente tenham \n)
/// x: modo verbose (ignora espaços e permite comentários)
pub static REGEX_SEARCH_SPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?isx)
        ^ # Início da string
        (?:
            SPED   | # Ex: SPED-EFD-ICMS-IPI-2024-01.txt
            EFD      # Ex: EFD_ICMS_IPI_012024.txt
        )
        .*\.txt # Qualquer coisa seguida da extensão .txt
        $ # Fim da string
        ",
    )
    .unwrap()
});

// Regex para limpeza e validação
pub static RE_MULTISPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());
pub static RE_NON_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\D").unwrap());
pub static RE_CHAVE_44: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{44})$").unwrap());
pub static RE_PERIODO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(0[1-9]|1[0-2])$").unwrap());
